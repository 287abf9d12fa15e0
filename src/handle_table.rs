use crate::HashMap;

/// Counts outstanding writable handles per proxy inode.
///
/// Migration must only run when the last writable handle goes away;
/// the bridge may hold several handles on the same file at once.
#[derive(Default)]
pub(crate) struct HandleTable {
    counts: HashMap<u64, u32>,
}

impl HandleTable {
    /// Registers one more writable handle.
    pub fn open(&mut self, ino: u64) -> u32 {
        let count = self.counts.entry(ino).or_insert(0);
        *count += 1;
        *count
    }

    /// Unregisters a writable handle, returning how many remain.
    ///
    /// Closing an untracked inode returns 0, so a release without a
    /// matching open still runs the migration decision exactly once.
    pub fn close(&mut self, ino: u64) -> u32 {
        match self.counts.get_mut(&ino) {
            Some(count) => {
                *count -= 1;

                if *count == 0 {
                    self.counts.remove(&ino);
                    0
                } else {
                    *count
                }
            }
            None => 0,
        }
    }
}
