use pointers::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize, Deserialize)]
pub struct Post {
    pub id: Ulid,
    pub title: String,
}

pointable!(Post, table = "posts", id = "01J9Y8PX0000000000000000A1");

#[derive(Serialize, Deserialize)]
pub struct Article {
    pub id: Ulid,
    pub title: String,
}

pointable!(Article, table = "articles", id = "01J9Y8PX0000000000000000A2", fields = ["title"], builder = articles);

pub fn articles() -> Arc<dyn QueryBuilder> {
    Arc::new(GenericQueryBuilder::new(vec!["id".into(), "title".into()]))
}

fn main() {
    let post = Post { id: Ulid::new(), title: "t".into() };
    assert_eq!(post.pointer_id(), post.id);
    assert_eq!(Post::DECL.table_name, "posts");
    assert_eq!(Post::DECL.role, Role::Pointable);
    assert_eq!(Article::DECL.fields, &["title"]);
    assert!(Article::DECL.query_builder.is_some());
    assert_eq!(inventory::iter::<TableDecl>.into_iter().count(), 2);
}
