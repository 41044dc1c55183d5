use crate::error::AppError;
use crate::pointer::Pointer;
use crate::registry::{Registry, TypeRef};
use crate::row::Row;
use crate::table::Pointable;
use ulid::Ulid;

impl Registry {
    /// Handle for an in-memory record, already carrying the record. Only declarations are
    /// consulted, nothing is written.
    pub fn forge<T: Pointable>(&self, record: &T) -> Result<Pointer, AppError> {
        let type_ref = TypeRef::Name(T::DECL.type_name.to_string());
        let table_id = match self.declared(&type_ref) {
            Some((id, decl)) if decl.id == T::DECL.id => id,
            _ => return Err(AppError::UnknownType(T::DECL.type_name.to_string())),
        };
        let row = Row::encode(record)?;
        Pointer::new(record.pointer_id(), table_id).with_resolved(row)
    }

    /// Bare handle to `id` of the given type. Whether the record exists is not checked.
    pub fn forge_ref(&self, type_ref: impl Into<TypeRef>, id: Ulid) -> Result<Pointer, AppError> {
        let type_ref = type_ref.into();
        match self.declared(&type_ref) {
            Some((table_id, _)) => Ok(Pointer::new(id, table_id)),
            None => Err(AppError::UnknownType(type_ref.to_string())),
        }
    }
}
