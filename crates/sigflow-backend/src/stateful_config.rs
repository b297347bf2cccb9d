//! Differential tracking of the configuration applied to one chip.
//!
//! The tracker remembers the encoded words of the last applied [`Chip`] and
//! of the FPGA-side DRAM image. Setting a new image splits all words into
//! a *base* set (unchanged words, rewritten only when state must be
//! restored) and a *differential* set (words that changed):
//!
//! ```text
//!  set_chip(new, split = true)
//!   ├─ differential mode off ──► base = all words, differential = {}
//!   ├─ fresh tracker ──────────► base = all words, differential = {}
//!   ├─ image changed ──────────► base = unchanged, differential = changed
//!   └─ image identical ────────► base = all words, differential = {}
//! ```
//!
//! `set_chip(new, split = false)` only records the image, e.g. the state
//! read back after the PPU ran.

use sigflow_hw::address;
use sigflow_hw::{Address, Chip, Word};

/// Last applied configuration of one chip plus the write sets derived from it.
#[derive(Clone, Debug)]
pub struct StatefulConnectionConfig {
    enable_differential_config: bool,
    last_chip: Option<Chip>,
    chip_words: Vec<(Address, Word)>,
    chip_base: Vec<(Address, Word)>,
    chip_differential: Vec<(Address, Word)>,
    dram_words: Vec<(Address, Word)>,
    dram_base: Vec<(Address, Word)>,
    dram_differential: Vec<(Address, Word)>,
}

impl Default for StatefulConnectionConfig {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StatefulConnectionConfig {
    /// Creates a fresh tracker.
    pub fn new(enable_differential_config: bool) -> Self {
        Self {
            enable_differential_config,
            last_chip: None,
            chip_words: Vec::new(),
            chip_base: Vec::new(),
            chip_differential: Vec::new(),
            dram_words: Vec::new(),
            dram_base: Vec::new(),
            dram_differential: Vec::new(),
        }
    }

    /// Whether only changed words are written.
    pub fn enable_differential_config(&self) -> bool {
        self.enable_differential_config
    }

    /// Records `chip` as the applied image.
    ///
    /// With `split_base_differential`, the base and differential write sets
    /// are recomputed against the previous image.
    pub fn set_chip(&mut self, chip: &Chip, split_base_differential: bool) {
        if !split_base_differential {
            if self.last_chip.as_ref() != Some(chip) {
                self.chip_words = chip.encode();
                self.last_chip = Some(chip.clone());
            }
            return;
        }

        // The DRAM image stays applied until `set_external_dram` replaces it.
        self.dram_base.clone_from(&self.dram_words);
        self.dram_differential.clear();

        if !self.enable_differential_config || self.is_fresh() {
            self.chip_words = chip.encode();
            self.chip_base.clone_from(&self.chip_words);
            self.chip_differential.clear();
            self.last_chip = self.enable_differential_config.then(|| chip.clone());
            return;
        }

        if self.last_chip.as_ref() == Some(chip) {
            self.chip_base.clone_from(&self.chip_words);
            self.chip_differential.clear();
            return;
        }

        let words = chip.encode();
        self.chip_base.clear();
        self.chip_differential.clear();
        for (&(address, word), &(_, last)) in words.iter().zip(&self.chip_words) {
            if word == last {
                self.chip_base.push((address, word));
            } else {
                self.chip_differential.push((address, word));
            }
        }
        self.chip_words = words;
        self.last_chip = Some(chip.clone());
    }

    /// Records the DRAM image used by the PPU program, if any.
    pub fn set_external_dram(&mut self, memory: Option<&[u8]>) {
        let fresh = self.is_fresh();
        let last = std::mem::take(&mut self.dram_words);
        self.dram_words = memory.map_or_else(Vec::new, encode_dram);
        self.dram_base.clear();
        self.dram_differential.clear();

        if !self.enable_differential_config || fresh {
            self.dram_base.clone_from(&self.dram_words);
            return;
        }
        for &(address, word) in &self.dram_words {
            let changed = last
                .binary_search_by_key(&address, |&(a, _)| a)
                .is_ok_and(|i| last[i].1 != word);
            if changed {
                self.dram_differential.push((address, word));
            } else {
                self.dram_base.push((address, word));
            }
        }
    }

    /// Whether nothing was applied yet.
    pub fn is_fresh(&self) -> bool {
        self.chip_words.is_empty()
    }

    /// Whether the last `set_chip` or `set_external_dram` changed any word.
    pub fn has_differential(&self) -> bool {
        !self.chip_differential.is_empty() || !self.dram_differential.is_empty()
    }

    /// Whether an analog bias cell is among the changed words.
    pub fn differential_changes_capmem(&self) -> bool {
        self.chip_differential.iter().any(|(a, _)| a.is_capmem())
    }

    /// Words to write when nothing can be assumed about the chip.
    pub fn base(&self) -> Vec<(Address, Word)> {
        self.chip_base.iter().chain(&self.dram_base).copied().collect()
    }

    /// Words changed since the previous image.
    pub fn differential(&self) -> Vec<(Address, Word)> {
        self.chip_differential
            .iter()
            .chain(&self.dram_differential)
            .copied()
            .collect()
    }

    /// Image applied last.
    pub fn last_chip(&self) -> Option<&Chip> {
        self.last_chip.as_ref()
    }

    /// Returns to the fresh state, keeping the differential mode.
    pub fn reset(&mut self) {
        *self = Self::new(self.enable_differential_config);
    }
}

fn encode_dram(bytes: &[u8]) -> Vec<(Address, Word)> {
    bytes
        .chunks(4)
        .enumerate()
        .map(|(i, chunk)| {
            let mut w = [0u8; 4];
            w[..chunk.len()].copy_from_slice(chunk);
            (address::external_dram(4 * i), Word(u32::from_be_bytes(w)))
        })
        .collect()
}
