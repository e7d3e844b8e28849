//! The tiling plan: the only channel from host tiling to device kernel.
//!
//! A plan carries the launch core count, the dispatch key, the workspace
//! request, and a strategy-specific ordered field set. Serialization
//! flattens the fields as little-endian u64 in declaration order into a
//! caller-supplied buffer. The calling framework sizes that buffer from a
//! static upper bound, so a shortfall is a configuration defect and
//! panics rather than returning an error.

/// One named scalar in a plan's POD record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanField {
    pub name: &'static str,
    pub value: u64,
}

/// The output of a tiling decision, immutable once handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct TilingPlan {
    used_core_num: u32,
    tiling_key: u64,
    workspace_bytes: u64,
    fields: Vec<PlanField>,
}

impl TilingPlan {
    /// `used_core_num` must be at least 1; a strategy that cannot use a
    /// core has no business producing a plan.
    pub fn new(used_core_num: u32, tiling_key: u64) -> Self {
        assert!(used_core_num >= 1, "plan with zero cores");
        TilingPlan {
            used_core_num,
            tiling_key,
            workspace_bytes: 0,
            fields: Vec::new(),
        }
    }

    pub fn used_core_num(&self) -> u32 {
        self.used_core_num
    }

    pub fn tiling_key(&self) -> u64 {
        self.tiling_key
    }

    /// Add an op-frontend component (dtype code, variant bit) to the
    /// strategy's base key.
    pub fn augment_key(&mut self, component: u64) {
        self.tiling_key += component;
    }

    pub fn workspace_bytes(&self) -> u64 {
        self.workspace_bytes
    }

    pub fn set_workspace_bytes(&mut self, bytes: u64) {
        self.workspace_bytes = bytes;
    }

    /// Append a field. Order of calls is the serialized field order.
    pub fn push_field(&mut self, name: &'static str, value: u64) {
        debug_assert!(
            self.field(name).is_none(),
            "duplicate plan field {name}"
        );
        self.fields.push(PlanField { name, value });
    }

    /// Look up a field by name (tests and kernel shims).
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.value)
    }

    pub fn fields(&self) -> &[PlanField] {
        &self.fields
    }

    /// Bytes `serialize_into` will write.
    pub fn serialized_len(&self) -> usize {
        self.fields.len() * 8
    }

    /// Flatten the field set into `buf`. Returns the bytes written.
    ///
    /// Panics if `buf` is smaller than `serialized_len()`; the caller
    /// guarantees capacity ahead of time.
    pub fn serialize_into(&self, buf: &mut [u8]) -> usize {
        let need = self.serialized_len();
        assert!(
            buf.len() >= need,
            "tiling data buffer too small: need {need} bytes, have {}",
            buf.len()
        );
        for (i, field) in self.fields.iter().enumerate() {
            buf[i * 8..(i + 1) * 8].copy_from_slice(&field.value.to_le_bytes());
        }
        need
    }
}
