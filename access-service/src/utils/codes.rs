use rand::rngs::{OsRng, StdRng};
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Produces the 6-digit one-time codes mailed for verification and reset.
pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

fn format_code(value: u32) -> String {
    format!("{:06}", value)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCodeGenerator;

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        format_code(OsRng.gen_range(0..1_000_000))
    }
}

/// Deterministic generator for tests.
pub struct SeededCodeGenerator {
    rng: Mutex<StdRng>,
}

impl SeededCodeGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl CodeGenerator for SeededCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        format_code(rng.gen_range(0..1_000_000))
    }
}
