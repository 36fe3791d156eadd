//! Byte accounting for the composition cache.

/// Resident and reserved bytes against a fixed budget.
///
/// `reserved` covers builds in flight; it turns into `resident` when the
/// build is committed. `resident + reserved` never exceeds `budget`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLedger {
    budget: u64,
    resident: u64,
    reserved: u64,
}

impl MemoryLedger {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            resident: 0,
            reserved: 0,
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn resident(&self) -> u64 {
        self.resident
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Bytes neither resident nor reserved.
    pub fn available(&self) -> u64 {
        self.budget.saturating_sub(self.resident + self.reserved)
    }

    /// Reserve `bytes` if they fit without eviction.
    pub fn try_reserve(&mut self, bytes: u64) -> bool {
        if bytes <= self.available() {
            self.reserved += bytes;
            true
        } else {
            false
        }
    }

    pub fn unreserve(&mut self, bytes: u64) {
        self.reserved = self.reserved.saturating_sub(bytes);
    }

    /// Convert a reservation into `actual` resident bytes. `actual` must not
    /// exceed `reserved`; any surplus reservation is returned to the pool.
    pub fn commit(&mut self, reserved: u64, actual: u64) {
        debug_assert!(actual <= reserved);
        self.unreserve(reserved);
        self.resident += actual;
    }

    pub fn free(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.resident);
        self.resident = self.resident.saturating_sub(bytes);
    }
}
