use pointers::*;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Avatar {
    pub id: Ulid,
}

virtual_pointable!(Avatar, table = "avatars", id = "01J9Y8PX0000000000000000V1");

#[derive(Serialize, Deserialize)]
pub struct Badge {
    pub id: Ulid,
    pub label: String,
}

virtual_pointable!(Badge, table = "badges", id = "01J9Y8PX0000000000000000B1", convert = badge);

fn badge(pointer: &Pointer) -> Row {
    Row::with_id(pointer.id()).with("label", "gold")
}

fn main() {
    assert_eq!(Avatar::DECL.role, Role::Virtual);
    assert!(Avatar::DECL.to_virtual.is_none());
    let convert = Badge::DECL.to_virtual.unwrap();
    let row = convert(&Pointer::new(Ulid::new(), Badge::DECL.ulid().unwrap()));
    assert_eq!(row.value("label"), "gold");
}
