use crate::{Entity, ModelResult};

/// Optional per-model logic run around persistence.
///
/// Most models do not need this. Implement it when a model has derived
/// fields (for example compound index values built from other fields) that
/// must be recomputed on every save, or stored data that needs fixing up
/// after load.
pub trait ModelHooks: Send + Sync {
    /// Called before an entity is written. Errors abort the write.
    fn before_store(&self, entity: &mut Entity) -> ModelResult<()> {
        let _ = entity;
        Ok(())
    }

    /// Called after an entity is loaded and migrated, before it is returned
    /// to the caller.
    fn after_load(&self, entity: &mut Entity) -> ModelResult<()> {
        let _ = entity;
        Ok(())
    }
}
