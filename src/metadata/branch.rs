//! Branch table and name generation.
//!
//! The word lists are carried over verbatim from the reference implementation so that a
//! `random_branch_name()` call reads the same in either language's session history.

use rand::Rng;

/// One row of the `branch` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRow {
    /// The branch's name.
    pub branch_name: String,
    /// The commit the branch currently points to.
    pub commit_id: String,
}

const BRANCH_NAME_ADJECTIVES: &[&str] = &[
    "agile",
    "algebraic",
    "analytic",
    "atomic",
    "biochemical",
    "biogenic",
    "catalytic",
    "chaotic",
    "chromatic",
    "complex",
    "convergent",
    "cosmic",
    "diagonal",
    "dynamic",
    "electrostatic",
    "elemental",
    "entropic",
    "exponential",
    "fractal",
    "genetic",
    "genomic",
    "geometric",
    "inertial",
    "integer",
    "intrinsic",
    "invariant",
    "ionic",
    "isotopic",
    "iterative",
    "kinematic",
    "kinetic",
    "logarithmic",
    "luminescent",
    "luminous",
    "molecular",
    "nebular",
    "nebulous",
    "neural",
    "numeric",
    "orthogonal",
    "oscillating",
    "pulsating",
    "quantum",
    "radiant",
    "radiogenic",
    "rational",
    "recursive",
    "resilient",
    "resonant",
    "scalar",
    "sonic",
    "statistical",
    "stellar",
    "subatomic",
    "symmetric",
    "thermal",
    "topological",
    "trigonometric",
    "vibrant",
    "viscous",
];

const BRANCH_NAME_NOUNS: &[&str] = &[
    "allele",
    "atom",
    "bacteria",
    "beam",
    "bolt",
    "catalyst",
    "cell",
    "core",
    "cytoplasm",
    "dna",
    "doppler",
    "electrode",
    "electron",
    "enzyme",
    "fermentation",
    "flux",
    "force",
    "fuse",
    "gene",
    "genome",
    "heat",
    "heliocentric",
    "hydrocarbon",
    "hypothesis",
    "ion",
    "isotope",
    "kinetics",
    "lens",
    "ligand",
    "light",
    "magnetism",
    "mass",
    "microorganism",
    "nebula",
    "neuron",
    "orb",
    "orbit",
    "oscillation",
    "photosynthesis",
    "pixel",
    "plasma",
    "plasmid",
    "polymer",
    "prism",
    "prokaryote",
    "proton",
    "pulse",
    "quantum",
    "quark",
    "radiance",
    "reactor",
    "rna",
    "spark",
    "spin",
    "supernova",
    "thermodynamics",
    "transcription",
    "valve",
    "vesicle",
    "wave",
];

/// Draws a fresh `<adjective>_<noun>` branch name. Collisions are possible (the word lists
/// give a few thousand combinations); callers that need uniqueness should retry against
/// [`super::MetadataStore::get_branch`].
pub fn random_branch_name() -> String {
    let mut rng = rand::thread_rng();
    let adj = BRANCH_NAME_ADJECTIVES[rng.gen_range(0..BRANCH_NAME_ADJECTIVES.len())];
    let noun = BRANCH_NAME_NOUNS[rng.gen_range(0..BRANCH_NAME_NOUNS.len())];
    format!("{adj}_{noun}")
}
