use crate::constants::{CHAR_OFFSET, SPLIT_BITS, SPLIT_MASK, WINDOW_SIZE};

/// Rolling checksum over a fixed 64-byte window.
///
/// The digest after any roll depends only on the last [`WINDOW_SIZE`] bytes
/// seen, never on earlier input, which is what makes chunk boundaries
/// survive insertions and deletions upstream of the window. A fresh instance
/// behaves as if 64 zero bytes had already been rolled in.
pub struct RollSum {
    s1: u32,
    s2: u32,
    window: [u8; WINDOW_SIZE],
    wofs: usize,
}

impl RollSum {
    pub fn new() -> Self {
        Self {
            s1: WINDOW_SIZE as u32 * CHAR_OFFSET,
            s2: WINDOW_SIZE as u32 * (WINDOW_SIZE as u32 - 1) * CHAR_OFFSET,
            window: [0u8; WINDOW_SIZE],
            wofs: 0,
        }
    }

    fn add(&mut self, drop: u32, add: u32) {
        let s1 = self.s1.wrapping_add(add).wrapping_sub(drop);
        self.s2 = self
            .s2
            .wrapping_add(s1)
            .wrapping_sub((WINDOW_SIZE as u32).wrapping_mul(drop.wrapping_add(CHAR_OFFSET)));
        self.s1 = s1;
    }

    /// Advance the window by one byte.
    pub fn roll(&mut self, b: u8) {
        let departing = self.window[self.wofs];
        self.add(u32::from(departing), u32::from(b));
        self.window[self.wofs] = b;
        self.wofs = (self.wofs + 1) & (WINDOW_SIZE - 1);
    }

    /// The current 32-bit checksum of the window.
    pub fn digest(&self) -> u32 {
        (self.s1 << 16) | (self.s2 & 0xffff)
    }

    /// True when the low [`SPLIT_BITS`] bits of the digest are all ones,
    /// i.e. the current position is a content-defined chunk boundary.
    pub fn on_split(&self) -> bool {
        self.s2 & SPLIT_MASK == SPLIT_MASK
    }

    /// Effective number of matched split bits at the current position.
    /// Adaptive chunking heuristics use the run of ones above the mask to
    /// bias boundary choice; plain chunking only needs [`Self::on_split`].
    pub fn bits(&self) -> u32 {
        SPLIT_BITS + (self.digest() >> (SPLIT_BITS + 1)).trailing_ones()
    }
}

impl Default for RollSum {
    fn default() -> Self {
        Self::new()
    }
}
