use crate::error::EngineError;

const COLOURS: [&str; 6] = ["Red", "Green", "Blue", "Orange", "Pink", "Purple"];

// ═══════════════════════════════════════════════════════════════
//  Rng
// ═══════════════════════════════════════════════════════════════

/// Xorshift64 generator. Not for anything security related.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    /// `seed == 0` seeds from the wall clock.
    pub fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed
        };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns f64 in [0, 1)
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / ((1u64 << 53) as f64)
    }

    pub fn next_intn(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

// ═══════════════════════════════════════════════════════════════
//  StreamNaming
// ═══════════════════════════════════════════════════════════════

/// Picks the stream name for a session.
///
/// An explicitly configured name always wins. Without one, a `<Colour>-<n>`
/// name is generated once and reused for every session of the same
/// controller, so restarting a recording appends to the same stream.
#[derive(Debug, Clone)]
pub struct StreamNaming {
    explicit: Option<String>,
    generated: String,
}

impl StreamNaming {
    pub fn new(rng: &mut Rng) -> Self {
        let colour = COLOURS[rng.next_intn(COLOURS.len())];
        let number = rng.next_intn(1000);
        Self {
            explicit: None,
            generated: format!("{colour}-{number}"),
        }
    }

    pub fn set_explicit(&mut self, name: Option<String>) {
        self.explicit = name;
    }

    pub fn explicit(&self) -> Option<&str> {
        self.explicit.as_deref()
    }

    pub fn generated(&self) -> &str {
        &self.generated
    }

    /// Name the next session opens.
    pub fn resolve(&self) -> Result<&str, EngineError> {
        match self.explicit.as_deref() {
            Some(name) if name.trim().is_empty() => {
                Err(EngineError::Configuration("stream name must not be empty".into()))
            }
            Some(name) => Ok(name),
            None => Ok(&self.generated),
        }
    }
}

impl Default for StreamNaming {
    fn default() -> Self {
        Self::new(&mut Rng::new(0))
    }
}
