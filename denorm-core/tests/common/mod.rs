//! Forum fixture schema shared by the integration tests and benches.
//!
//! Forums hold posts, posts hold attachments and replies, members write
//! and bookmark posts, and tags attach to forums or posts through a
//! generic key.

#![allow(dead_code)]

use denorm_core::{
    ComputeError, DependencySpec, Direction, EntityRef, Registry, Session, Store, Value, ValueType,
    View,
};

pub fn forum_registry() -> Registry {
    let mut builder = Registry::builder();
    builder
        .kind("Forum")
        .kind("Post")
        .kind("Attachment")
        .kind("Member")
        .kind("Tag")
        .foreign_key("Forum", "parent_forum", "Forum")
        .foreign_key("Post", "forum", "Forum")
        .foreign_key("Post", "author", "Member")
        .foreign_key("Post", "response_to", "Post")
        .foreign_key("Attachment", "post", "Post")
        .many_to_many("Member", "bookmarks", "Post")
        .generic_key("Tag", "content_type", "object_id");

    // Forum
    builder
        .register("Forum", "tags_string", ValueType::Text, tags_string)
        .unwrap()
        .depends_on(DependencySpec::on("Tag").fields(["name"]));
    builder.count_field("Forum", "post_count", "Post", "forum").unwrap();
    builder
        .register("Forum", "author_names", ValueType::Text, |forum| {
            let names = forum
                .reverse("Post", "forum")?
                .iter()
                .map(|post| post.text("author_name"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names.join(", ").into())
        })
        .unwrap()
        .depends_on(
            DependencySpec::on("Post")
                .foreign_key("forum")
                .fields(["author_name"]),
        );
    builder
        .register("Forum", "authors", ValueType::List, |forum| {
            let mut authors: Vec<Value> = Vec::new();
            for post in forum.reverse("Post", "forum")? {
                if let Some(author) = post.forward("author")? {
                    let author = Value::from(author.entity().clone());
                    if !authors.contains(&author) {
                        authors.push(author);
                    }
                }
            }
            Ok(Value::List(authors))
        })
        .unwrap()
        .depends_on(DependencySpec::on("Post").fields(["author"]));
    builder
        .register("Forum", "path", ValueType::Text, |forum| {
            let title = forum.text("title")?;
            Ok(match forum.forward("parent_forum")? {
                Some(parent) => format!("{}{title}/", parent.text("path")?),
                None => format!("/{title}/"),
            }
            .into())
        })
        .unwrap()
        .reads(["title", "parent_forum"])
        .depends_on(DependencySpec::on_self(Direction::Forward).fields(["path"]));

    // Post
    builder
        .register("Post", "tags_string", ValueType::Text, tags_string)
        .unwrap()
        .depends_on(DependencySpec::on("Tag").fields(["name"]));
    builder.count_field("Post", "attachment_count", "Attachment", "post").unwrap();
    builder
        .register("Post", "forum_title", ValueType::Text, |post| {
            Ok(match post.forward("forum")? {
                Some(forum) => forum.text("title")?.into(),
                None => Value::from(""),
            })
        })
        .unwrap()
        .reads(["forum"])
        .depends_on(DependencySpec::on("Forum").fields(["title"]));
    builder
        .register("Post", "author_name", ValueType::Text, |post| {
            Ok(match post.forward("author")? {
                Some(author) => author.text("name")?.into(),
                None => Value::from(""),
            })
        })
        .unwrap()
        .reads(["author"])
        .depends_on(
            DependencySpec::on("Member")
                .foreign_key("author")
                .fields(["name"]),
        );
    builder
        .register("Post", "response_count", ValueType::Int, |post| {
            if !post.is_persisted() {
                return Ok(Value::Int(0));
            }
            let mut total = post.count_reverse("Post", "response_to")? as i64;
            for reply in post.reverse("Post", "response_to")? {
                total += reply.int("response_count")?;
            }
            Ok(Value::Int(total))
        })
        .unwrap()
        .reads(["response_to"])
        .depends_on(DependencySpec::on_self(Direction::Backward).fields(["response_count"]));

    // Attachment
    builder
        .register("Attachment", "forum", ValueType::Ref, |attachment| {
            let Some(post) = attachment.forward("post")? else {
                return Ok(Value::Null);
            };
            Ok(post
                .forward("forum")?
                .map(|forum| Value::from(forum.entity().clone()))
                .unwrap_or_default())
        })
        .unwrap()
        .reads(["post"])
        .depends_on(DependencySpec::on("Post").fields(["forum"]));

    // Member
    builder
        .register("Member", "full_name", ValueType::Text, |member| {
            Ok(format!("{} {}", member.text("first_name")?, member.text("name")?).into())
        })
        .unwrap()
        .reads(["first_name", "name"]);
    builder
        .register("Member", "bookmark_titles", ValueType::Text, |member| {
            let titles = member
                .many("bookmarks")?
                .iter()
                .map(|post| post.text("title"))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(titles.join("\n").into())
        })
        .unwrap()
        .reads([])
        .depends_on(
            DependencySpec::on("Post")
                .foreign_key("bookmarks")
                .fields(["title"]),
        );

    builder.seal().unwrap()
}

fn tags_string(entity: &View<'_>) -> Result<Value, ComputeError> {
    let mut names = entity
        .generic_reverse("Tag", "content_type", "object_id")?
        .iter()
        .map(|tag| tag.text("name"))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();
    Ok(names.join(", ").into())
}

pub fn forum(session: &Session<'_>, title: &str, parent: Option<&EntityRef>) -> EntityRef {
    session
        .create(
            "Forum",
            [
                ("title", Value::from(title)),
                ("parent_forum", Value::from(parent.cloned())),
            ],
        )
        .unwrap()
}

pub fn member(session: &Session<'_>, first_name: &str, name: &str) -> EntityRef {
    session
        .create(
            "Member",
            [("first_name", Value::from(first_name)), ("name", Value::from(name))],
        )
        .unwrap()
}

pub fn post(session: &Session<'_>, forum: &EntityRef, author: Option<&EntityRef>) -> EntityRef {
    session
        .create(
            "Post",
            [
                ("forum", Value::from(forum.clone())),
                ("author", Value::from(author.cloned())),
            ],
        )
        .unwrap()
}

pub fn reply(session: &Session<'_>, to: &EntityRef) -> EntityRef {
    session
        .create("Post", [("response_to", Value::from(to.clone()))])
        .unwrap()
}

pub fn tag(session: &Session<'_>, target: &EntityRef, name: &str) -> EntityRef {
    session
        .create(
            "Tag",
            [
                ("name", Value::from(name)),
                ("content_type", Value::from(target.kind.as_str())),
                ("object_id", Value::Int(target.id.raw() as i64)),
            ],
        )
        .unwrap()
}

pub fn text(session: &Session<'_>, entity: &EntityRef, field: &str) -> String {
    match session.get(entity, field).unwrap() {
        Value::Text(text) => text,
        other => panic!("{entity}.{field} is not text: {other:?}"),
    }
}

pub fn int(session: &Session<'_>, entity: &EntityRef, field: &str) -> i64 {
    match session.get(entity, field).unwrap() {
        Value::Int(i) => i,
        other => panic!("{entity}.{field} is not an integer: {other:?}"),
    }
}

/// Every stored computed value equals a from-scratch evaluation.
pub fn assert_consistent(session: &Session<'_>) {
    let engine = session.engine();
    let registry = engine.registry();
    for kind in registry.kinds() {
        for entity in session.store().entities(kind).unwrap() {
            for field in registry.fields_of(kind) {
                let name = field.key().field.as_str();
                let stored = session.get(&entity, name).unwrap();
                let fresh = engine.evaluate(session.store(), &entity, name).unwrap();
                assert_eq!(stored, fresh, "{entity}.{name} is stale");
            }
        }
    }
}
