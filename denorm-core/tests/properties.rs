//! Property Tests for Consistency
//!
//! Random sequences of writes against the forum schema must leave every
//! computed field equal to a from-scratch evaluation.

mod common;

use common::*;
use denorm_core::{count, EntityRef, Kind, Session, Store, Value};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Op {
    Post { forum: usize, author: usize },
    Reply { to: usize },
    DeletePost { post: usize },
    MovePost { post: usize, forum: usize },
    Rename { member: usize, name: String },
    Retitle { forum: usize, title: String },
    Tag { post: usize, name: String },
    Bookmark { member: usize, post: usize },
    Unbookmark { member: usize, post: usize },
    Attach { post: usize },
    Join { name: String },
    DeleteMember { member: usize },
    Open { parent: usize, title: String },
    Reparent { forum: usize, parent: usize },
    DeleteForum { forum: usize },
}

fn arb_name() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), any::<usize>()).prop_map(|(forum, author)| Op::Post { forum, author }),
        2 => any::<usize>().prop_map(|to| Op::Reply { to }),
        1 => any::<usize>().prop_map(|post| Op::DeletePost { post }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(post, forum)| Op::MovePost { post, forum }),
        1 => (any::<usize>(), arb_name()).prop_map(|(member, name)| Op::Rename { member, name }),
        1 => (any::<usize>(), arb_name()).prop_map(|(forum, title)| Op::Retitle { forum, title }),
        1 => (any::<usize>(), arb_name()).prop_map(|(post, name)| Op::Tag { post, name }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(member, post)| Op::Bookmark { member, post }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(member, post)| Op::Unbookmark { member, post }),
        1 => any::<usize>().prop_map(|post| Op::Attach { post }),
        1 => arb_name().prop_map(|name| Op::Join { name }),
        1 => any::<usize>().prop_map(|member| Op::DeleteMember { member }),
        1 => (any::<usize>(), arb_name()).prop_map(|(parent, title)| Op::Open { parent, title }),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(forum, parent)| Op::Reparent { forum, parent }),
        1 => any::<usize>().prop_map(|forum| Op::DeleteForum { forum }),
    ]
}

fn pick(items: &[EntityRef], index: usize) -> Option<&EntityRef> {
    (!items.is_empty()).then(|| &items[index % items.len()])
}

fn take(items: &mut Vec<EntityRef>, index: usize) -> Option<EntityRef> {
    (!items.is_empty()).then(|| items.remove(index % items.len()))
}

/// Live entities of the walk. Forums are kept in creation order and a
/// forum's parent always comes earlier, so the forum tree stays acyclic.
struct World<'r> {
    session: Session<'r>,
    forums: Vec<EntityRef>,
    members: Vec<EntityRef>,
    posts: Vec<EntityRef>,
}

impl<'r> World<'r> {
    fn new(session: Session<'r>) -> Self {
        let root = forum(&session, "root", None);
        let child = forum(&session, "child", Some(&root));
        let forums = vec![root, child];
        let members = vec![
            member(&session, "Ada", "Lovelace"),
            member(&session, "Alan", "Turing"),
        ];
        Self { session, forums, members, posts: Vec::new() }
    }

    fn apply(&mut self, op: Op) {
        let session = &self.session;
        match op {
            Op::Post { forum, author } => {
                if let Some(forum) = pick(&self.forums, forum) {
                    let author = pick(&self.members, author);
                    self.posts.push(post(session, forum, author));
                }
            }
            Op::Reply { to } => {
                if let Some(to) = pick(&self.posts, to).cloned() {
                    self.posts.push(reply(session, &to));
                }
            }
            Op::DeletePost { post } => {
                if let Some(post) = take(&mut self.posts, post) {
                    session.delete(&post).unwrap();
                }
            }
            Op::MovePost { post, forum } => {
                if let (Some(post), Some(forum)) = (pick(&self.posts, post), pick(&self.forums, forum)) {
                    session
                        .update(post, [("forum", Value::from(forum.clone()))])
                        .unwrap();
                }
            }
            Op::Rename { member, name } => {
                if let Some(member) = pick(&self.members, member) {
                    session.update(member, [("name", Value::from(name))]).unwrap();
                }
            }
            Op::Retitle { forum, title } => {
                if let Some(forum) = pick(&self.forums, forum) {
                    session.update(forum, [("title", Value::from(title))]).unwrap();
                }
            }
            Op::Tag { post, name } => {
                if let Some(post) = pick(&self.posts, post) {
                    tag(session, post, &name);
                }
            }
            Op::Bookmark { member, post } => {
                if let (Some(member), Some(post)) = (pick(&self.members, member), pick(&self.posts, post)) {
                    session.link(member, "bookmarks", post).unwrap();
                }
            }
            Op::Unbookmark { member, post } => {
                if let (Some(member), Some(post)) = (pick(&self.members, member), pick(&self.posts, post)) {
                    session.unlink(member, "bookmarks", post).unwrap();
                }
            }
            Op::Attach { post } => {
                if let Some(post) = pick(&self.posts, post) {
                    session
                        .create("Attachment", [("post", Value::from(post.clone()))])
                        .unwrap();
                }
            }
            Op::Join { name } => {
                self.members.push(member(session, "New", &name));
            }
            Op::DeleteMember { member } => {
                if let Some(member) = take(&mut self.members, member) {
                    session.delete(&member).unwrap();
                }
            }
            Op::Open { parent, title } => {
                // One past the end opens a new root.
                let parent = self.forums.get(parent % (self.forums.len() + 1));
                let opened = forum(session, &title, parent);
                self.forums.push(opened);
            }
            Op::Reparent { forum, parent } => {
                if self.forums.is_empty() {
                    return;
                }
                let index = forum % self.forums.len();
                // Indices below `index` are earlier forums; `index` itself
                // makes the forum a root.
                let parent = parent % (index + 1);
                let parent = (parent < index).then(|| self.forums[parent].clone());
                session
                    .update(&self.forums[index], [("parent_forum", Value::from(parent))])
                    .unwrap();
            }
            Op::DeleteForum { forum } => {
                if let Some(forum) = take(&mut self.forums, forum) {
                    session.delete(&forum).unwrap();
                }
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_writes_leave_every_field_consistent(
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let registry = forum_registry();
        let mut world = World::new(Session::new(&registry));
        for op in ops {
            world.apply(op);
        }
        assert_consistent(&world.session);
    }

    #[test]
    fn post_count_matches_the_count_fast_path(
        ops in prop::collection::vec(arb_op(), 1..40),
    ) {
        let registry = forum_registry();
        let mut world = World::new(Session::new(&registry));
        for op in ops {
            world.apply(op);
        }

        let store = world.session.store();
        for board in &world.forums {
            let traversed = store
                .entities(&Kind::new("Post"))
                .unwrap()
                .filter(|post| store.get(post, "forum").unwrap() == Value::from(board.clone()))
                .count();
            let fast = count(store, board, "Post", "forum").unwrap();
            prop_assert_eq!(fast, traversed);
            prop_assert_eq!(int(&world.session, board, "post_count"), traversed as i64);
        }
    }
}
