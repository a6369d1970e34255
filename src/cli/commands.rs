//! Command implementations. Each function owns one subcommand's side effects and stdout
//! rendering; `run` just dispatches.

use std::path::Path;

use clap::CommandFactory;
use clap_complete::Shell;
use xxhash_rust::xxh64::xxh64;

use crate::commit_graph::CommitGraph;
use crate::config::Config;
use crate::error::{KishuError, Result};
use crate::metadata::{Head, HostConnection, MetadataStore, Resolved};
use crate::path::PathLayout;
use crate::session::SessionController;

use super::{Cli, Command};

/// Derives a stable notebook key from its path, used to name the session directory.
pub fn notebook_key_for(path: &Path) -> String {
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("{:016x}", xxh64(canonical.to_string_lossy().as_bytes(), 0))
}

fn layout_for(key: &str, path_root: Option<&Path>) -> PathLayout {
    match path_root {
        Some(root) => PathLayout::new(root, key),
        None => PathLayout::for_notebook(key),
    }
}

/// Adds (or removes) the `kishu` metadata block on a notebook's JSON.
fn set_notebook_kishu_block(path: &Path, notebook_key: Option<&str>) -> Result<()> {
    let text = std::fs::read_to_string(path)?;
    let mut doc: serde_json::Value = serde_json::from_str(&text)?;
    let metadata = doc
        .as_object_mut()
        .ok_or_else(|| KishuError::InvalidArgument("notebook file is not a JSON object".into()))?
        .entry("metadata")
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    let metadata = metadata
        .as_object_mut()
        .ok_or_else(|| KishuError::InvalidArgument("notebook metadata is not an object".into()))?;

    match notebook_key {
        Some(key) => {
            let block = metadata
                .entry("kishu")
                .or_insert_with(|| serde_json::json!({"notebook_id": key, "session_count": 0}));
            if let Some(obj) = block.as_object_mut() {
                let count = obj.get("session_count").and_then(|v| v.as_i64()).unwrap_or(0);
                obj.insert("notebook_id".into(), serde_json::json!(key));
                obj.insert("session_count".into(), serde_json::json!(count + 1));
            }
        }
        None => {
            metadata.remove("kishu");
        }
    }

    std::fs::write(path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

/// Dispatches one parsed CLI invocation.
pub fn run(cli: &Cli, config: &Config) -> Result<()> {
    let root = cli.path_root.as_deref();
    match &cli.command {
        Command::Init { path } => init(path, root),
        Command::Detach { path } => detach(path),
        Command::List { all } => list(*all, root),
        Command::Log { key, commit, all, graph } => log(key, commit.as_deref(), *all, *graph, root),
        Command::Status { key, commit } => status(key, commit, root),
        Command::Commit { key, message, edit } => commit(key, message.clone(), edit.as_deref(), config, root),
        Command::Checkout { key, reference, skip_notebook } => {
            checkout(key, reference, *skip_notebook, config, root)
        }
        Command::Branch { key, commit, create, delete, rename } => {
            branch(key, commit.as_deref(), create.as_deref(), delete.as_deref(), rename.as_deref(), root)
        }
        Command::Tag { key, name, commit, message, delete, list } => tag(
            key,
            name.as_deref(),
            commit.as_deref(),
            message.as_deref(),
            delete.as_deref(),
            *list,
            root,
        ),
        Command::Fegraph { key } => fegraph(key, root),
        Command::Fecommit { key, commit } => fecommit(key, commit, root),
        Command::Completions { shell } => completions(*shell),
    }
}

fn completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}

fn init(path: &Path, path_root: Option<&Path>) -> Result<()> {
    let key = notebook_key_for(path);
    let layout = layout_for(&key, path_root);
    SessionController::install(layout.clone(), &key, Config::from_env())?;
    set_notebook_kishu_block(path, Some(&key))?;
    HostConnection {
        kernel_id: None,
        notebook_path: Some(path.to_string_lossy().into_owned()),
    }
    .write(&layout.connection_path())?;
    println!("{key}");
    Ok(())
}

fn detach(path: &Path) -> Result<()> {
    set_notebook_kishu_block(path, None)?;
    println!("detached {}", path.display());
    Ok(())
}

fn list(all: bool, path_root: Option<&Path>) -> Result<()> {
    let root = path_root
        .map(Path::to_path_buf)
        .unwrap_or_else(PathLayout::default_sessions_root);
    let entries = std::fs::read_dir(&root).map(|rd| rd.flatten().collect()).unwrap_or_else(|_| Vec::new());
    for entry in entries {
        let key = entry.file_name().to_string_lossy().to_string();
        let layout = layout_for(&key, path_root);
        let head = Head::read(&layout.head_path());
        let connection = HostConnection::read(&layout.connection_path());
        if all || head.commit_id.is_some() {
            println!(
                "{key}\t{}\t{}",
                head.commit_id.as_deref().unwrap_or("-"),
                connection.notebook_path.as_deref().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

fn open_metadata(key: &str, path_root: Option<&Path>) -> Result<MetadataStore> {
    MetadataStore::open(&layout_for(key, path_root).database_path())
}

fn log(key: &str, commit_id: Option<&str>, all: bool, graph: bool, path_root: Option<&Path>) -> Result<()> {
    let layout = layout_for(key, path_root);
    let metadata = open_metadata(key, path_root)?;
    let mut commit_graph = CommitGraph::open(&layout.commit_graph_dir())?;
    if let Some(head_commit) = Head::read(&layout.head_path()).commit_id {
        commit_graph.jump(&head_commit)?;
    }

    let history = commit_graph.list_history(commit_id);
    let history: Vec<_> = if all { history } else { history.into_iter().take(1).collect() };

    for (depth, info) in history.iter().enumerate() {
        let entry = metadata.get_commit(&info.commit_id)?;
        let prefix = if graph { "* ".repeat(depth + 1) } else { String::new() };
        println!("{prefix}{}  {}", info.commit_id, entry.message);
    }
    Ok(())
}

fn status(key: &str, commit_id: &str, path_root: Option<&Path>) -> Result<()> {
    let metadata = open_metadata(key, path_root)?;
    let entry = metadata.get_commit(commit_id)?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

fn commit(
    key: &str,
    message: Option<String>,
    edit: Option<&str>,
    config: &Config,
    path_root: Option<&Path>,
) -> Result<()> {
    let layout = layout_for(key, path_root);
    if let Some(target) = edit {
        let metadata = open_metadata(key, path_root)?;
        let mut entry = metadata.get_commit(target)?;
        entry.message = message.unwrap_or_default();
        metadata.update_commit(&entry)?;
        println!("{target}");
        return Ok(());
    }
    let mut session = SessionController::install(layout, key, config.clone())?;
    let commit_id = session.commit(message)?;
    println!("{commit_id}");
    Ok(())
}

fn checkout(
    key: &str,
    reference: &str,
    skip_notebook: bool,
    config: &Config,
    path_root: Option<&Path>,
) -> Result<()> {
    let layout = layout_for(key, path_root);
    let mut session = SessionController::install(layout, key, config.clone())?;
    let (commit_id, fallbacked) = session.checkout(reference, skip_notebook)?;
    println!("{commit_id}");
    for action in fallbacked {
        println!("fallback: cell {} rerun ({})", action.cell_num, action.reason);
    }
    Ok(())
}

fn branch(
    key: &str,
    commit_id: Option<&str>,
    create: Option<&str>,
    delete: Option<&str>,
    rename: Option<&[String]>,
    path_root: Option<&Path>,
) -> Result<()> {
    let layout = layout_for(key, path_root);
    let metadata = open_metadata(key, path_root)?;
    let head = Head::read(&layout.head_path());

    if let Some(name) = create {
        let target = resolve_or_head(&metadata, &head, commit_id)?;
        metadata.upsert_branch(name, &target)?;
        println!("{name} -> {target}");
        return Ok(());
    }
    if let Some(name) = delete {
        metadata.delete_branch(name, &head)?;
        println!("deleted {name}");
        return Ok(());
    }
    if let [old, new] = rename.unwrap_or(&[]) {
        let head_moved = metadata.rename_branch(old, new, &head)?;
        if head_moved {
            Head::update(&layout.head_path(), Some(new), None, false)?;
        }
        println!("{old} -> {new}");
        return Ok(());
    }
    for row in metadata.list_branch()? {
        let marker = if head.branch_name.as_deref() == Some(&row.branch_name) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}\t{}", row.branch_name, row.commit_id);
    }
    Ok(())
}

fn resolve_or_head(metadata: &MetadataStore, head: &Head, commit_id: Option<&str>) -> Result<String> {
    match commit_id {
        Some(id) => match metadata.resolve_commit_id(id)? {
            Resolved::One(resolved) => Ok(resolved),
            Resolved::Ambiguous(_) => Err(KishuError::AmbiguousCommit(id.to_string())),
            Resolved::NotFound => Err(KishuError::CommitNotFound(id.to_string())),
        },
        None => head
            .commit_id
            .clone()
            .ok_or_else(|| KishuError::InvalidArgument("no commit given and HEAD is unset".into())),
    }
}

fn tag(
    key: &str,
    name: Option<&str>,
    commit_id: Option<&str>,
    message: Option<&str>,
    delete: Option<&str>,
    list_all: bool,
    path_root: Option<&Path>,
) -> Result<()> {
    let layout = layout_for(key, path_root);
    let metadata = open_metadata(key, path_root)?;
    let head = Head::read(&layout.head_path());

    if let Some(name) = delete {
        metadata.delete_tag(name)?;
        println!("deleted {name}");
        return Ok(());
    }
    if list_all || name.is_none() {
        for row in metadata.list_tag()? {
            println!("{}\t{}\t{}", row.tag_name, row.commit_id, row.message);
        }
        return Ok(());
    }
    let name = name.unwrap();
    let target = resolve_or_head(&metadata, &head, commit_id)?;
    metadata.create_tag(name, &target, message.unwrap_or(""))?;
    println!("{name} -> {target}");
    Ok(())
}

fn fegraph(key: &str, path_root: Option<&Path>) -> Result<()> {
    let metadata = open_metadata(key, path_root)?;
    let layout = layout_for(key, path_root);
    let mut commit_graph = CommitGraph::open(&layout.commit_graph_dir())?;
    if let Some(head_commit) = Head::read(&layout.head_path()).commit_id {
        commit_graph.jump(&head_commit)?;
    }

    let mut nodes = Vec::new();
    for info in commit_graph.list_history(None) {
        let entry = metadata.get_commit(&info.commit_id)?;
        nodes.push(serde_json::json!({
            "commit_id": info.commit_id,
            "parent_id": info.parent_id,
            "message": entry.message,
        }));
    }
    println!("{}", serde_json::to_string_pretty(&serde_json::json!({"nodes": nodes}))?);
    Ok(())
}

fn fecommit(key: &str, commit_id: &str, path_root: Option<&Path>) -> Result<()> {
    let metadata = open_metadata(key, path_root)?;
    let entry = metadata.get_commit(commit_id)?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}
