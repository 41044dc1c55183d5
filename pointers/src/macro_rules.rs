/// Declares a stored record type that pointers can refer to. The type needs an `id: Ulid`
/// field and serde derives.
///
/// ```ignore
/// pointable!(Post, table = "posts", id = "01J9Y8PX0000000000000000A1", fields = ["title", "body"]);
/// ```
///
/// `builder = path` names a `fn() -> Arc<dyn QueryBuilder>` used instead of the generic one.
#[macro_export]
macro_rules! pointable {
    ($ty:ty, table = $table:literal, id = $id:literal $(, fields = [$($field:literal),* $(,)?])? $(, builder = $builder:path)? $(,)?) => {
        impl $crate::Pointable for $ty {
            const DECL: $crate::TableDecl = $crate::TableDecl::pointable(stringify!($ty), $table, $id)
                $(.with_fields(&[$($field),*]))?
                $(.with_query_builder($builder))?;

            fn pointer_id(&self) -> $crate::Ulid {
                self.id
            }
        }

        $crate::inventory::submit! { <$ty as $crate::Pointable>::DECL }
    };
}

/// Declares a record type that has no table and is built from the handle itself.
/// `convert = path` names a `fn(&Pointer) -> Row`; without it the handle's own fields are used.
#[macro_export]
macro_rules! virtual_pointable {
    ($ty:ty, table = $table:literal, id = $id:literal $(, convert = $convert:path)? $(,)?) => {
        impl $crate::Pointable for $ty {
            const DECL: $crate::TableDecl = $crate::TableDecl::virtual_type(stringify!($ty), $table, $id)
                $(.with_virtual($convert))?;

            fn pointer_id(&self) -> $crate::Ulid {
                self.id
            }
        }

        $crate::inventory::submit! { <$ty as $crate::Pointable>::DECL }
    };
}
