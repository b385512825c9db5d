use core::fmt;

/// The four machine words the loader handed to the kernel entry point.
///
/// Their meaning belongs to the platform (a device tree pointer, a
/// multiboot info block, ...). The core only keeps and prints them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootArgs(pub [usize; 4]);

impl BootArgs {
    pub const fn get(&self, index: usize) -> Option<usize> {
        if index < self.0.len() {
            Some(self.0[index])
        } else {
            None
        }
    }

    pub const fn as_array(&self) -> &[usize; 4] {
        &self.0
    }
}

impl From<[usize; 4]> for BootArgs {
    fn from(words: [usize; 4]) -> Self {
        BootArgs(words)
    }
}

impl fmt::Display for BootArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{:#x} {:#x} {:#x} {:#x}", a, b, c, d)
    }
}
