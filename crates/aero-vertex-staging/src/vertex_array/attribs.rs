//! Per-slot synchronization state.

/// What the draw layer must redo for an attribute slot before the next draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttribSyncState {
    /// Nothing changed since the last resolve.
    Clean,
    /// Same layout, different buffer; a rebind is enough.
    BufferSwapped,
    /// Format, offset or stride changed; the pipeline's vertex layout must be rebuilt.
    #[default]
    FullyRespecified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttribEvent {
    BufferRebound,
    Respecified,
    /// The slot was resolved for a draw.
    Synced,
}

impl AttribSyncState {
    pub fn on(self, event: AttribEvent) -> Self {
        use AttribEvent::*;
        use AttribSyncState::*;
        match (self, event) {
            (_, Synced) => Clean,
            (FullyRespecified, _) | (_, Respecified) => FullyRespecified,
            (Clean | BufferSwapped, BufferRebound) => BufferSwapped,
        }
    }

    pub fn needs_pipeline_rebuild(self) -> bool {
        self == Self::FullyRespecified
    }
}

/// Layout the draw layer last saw for a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SlotLayout {
    pub stride: u32,
    pub format: crate::format::VertexFormat,
    pub divisor: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub(super) struct AttribSlot {
    pub state: AttribSyncState,
    pub layout: Option<SlotLayout>,
}

impl AttribSlot {
    /// Records a resolved layout; returns whether the pipeline must be rebuilt.
    pub fn sync(&mut self, layout: SlotLayout) -> bool {
        let dirty = self.state.needs_pipeline_rebuild() || self.layout != Some(layout);
        self.state = self.state.on(AttribEvent::Synced);
        self.layout = Some(layout);
        dirty
    }
}
