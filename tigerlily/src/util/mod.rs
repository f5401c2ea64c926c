pub mod dna;
pub mod strings;
