//! Permission propagation across create, copy, move and role changes

mod common;

use common::Harness;
use resource_tree::{Capabilities, Capability, NodeMetadata, Subject, TreeError};

#[test]
fn test_created_nodes_inherit_parent_entries() {
    let h = Harness::new();
    let (_, ws) = h.workspace("owner", "Biology", "BIO");
    let dir = h.mkdir(ws.root.id, "dir");
    let note = h.text(dir.id, "note");

    let mut expected = vec![ws.manager.id, ws.collaborator.id, ws.visitor.id];
    expected.sort();
    assert_eq!(h.permission_roles(dir.id), expected);
    assert_eq!(h.permission_roles(note.id), expected);

    let member = h.user("member");
    h.tree
        .access()
        .associate_roles(&[member.id], &[ws.collaborator.id])
        .unwrap();
    h.sign_in(member.id);
    assert!(h.tree.access().check(note.id, &Capability::Copy).unwrap());
    assert!(!h.tree.access().check(note.id, &Capability::Delete).unwrap());
    assert!(matches!(
        h.tree.tree().delete(note.id),
        Err(TreeError::PermissionDenied(_))
    ));
}

#[test]
fn test_copy_carries_only_the_actors_entries() {
    let h = Harness::new();
    let (owner, ws) = h.workspace("owner", "Biology", "BIO");
    let shared = h.mkdir(ws.root.id, "Shared");
    let note = h.text(ws.root.id, "note");
    h.tree
        .access()
        .grant(
            shared.id,
            ws.collaborator.id,
            Capabilities::from_mask(Capabilities::OPEN | Capabilities::COPY)
                .with_creatable(["text"]),
        )
        .unwrap();

    let member = h.user("member");
    h.tree
        .access()
        .associate_roles(&[member.id], &[ws.collaborator.id])
        .unwrap();

    h.sign_in(member.id);
    let copy = h.tree.tree().copy(note.id, shared.id).unwrap();
    assert_eq!(h.permission_roles(copy.id), vec![ws.collaborator.id]);

    // administrators carry every entry of the destination
    h.sign_in_admin(owner.id);
    let admin_copy = h.tree.tree().copy(note.id, shared.id).unwrap();
    assert_eq!(h.permission_roles(admin_copy.id), h.permission_roles(shared.id));
}

#[test]
fn test_copy_requires_copy_and_create_rights() {
    let h = Harness::new();
    let (_, ws) = h.workspace("owner", "Biology", "BIO");
    let note = h.text(ws.root.id, "note");
    let visitor = h.user("visitor");
    h.tree
        .access()
        .associate_roles(&[visitor.id], &[ws.visitor.id])
        .unwrap();

    h.sign_in(visitor.id);
    assert!(matches!(
        h.tree.tree().copy(note.id, ws.root.id),
        Err(TreeError::PermissionDenied(_))
    ));
    assert_eq!(h.descendants(ws.root.id).len(), 1);
}

#[test]
fn test_same_workspace_move_keeps_entries() {
    let h = Harness::new();
    let (_, ws) = h.workspace("owner", "Biology", "BIO");
    let a = h.mkdir(ws.root.id, "a");
    let b = h.mkdir(ws.root.id, "b");
    let note = h.text(a.id, "note");
    h.tree
        .access()
        .grant(note.id, ws.visitor.id, Capabilities::none())
        .unwrap();

    h.tree.tree().move_node(note.id, b.id).unwrap();

    let visitor = h.user("visitor");
    h.tree
        .access()
        .associate_roles(&[visitor.id], &[ws.visitor.id])
        .unwrap();
    h.sign_in(visitor.id);
    assert!(!h.tree.access().check(note.id, &Capability::Open).unwrap());
    assert!(h.tree.access().check(b.id, &Capability::Open).unwrap());
}

#[test]
fn test_cross_workspace_move_takes_new_workspace_entries() {
    let h = Harness::new();
    let (_, bio) = h.workspace("owner", "Biology", "BIO");
    let chem = h.tree.access().provision_workspace("Chemistry", "CHEM").unwrap();
    let dir = h.mkdir(bio.root.id, "Labs");
    let note = h.text(dir.id, "note");

    let moved = h.tree.tree().move_node(dir.id, chem.root.id).unwrap();
    assert_eq!(moved.workspace, chem.workspace.id);

    let mut expected = vec![chem.manager.id, chem.collaborator.id, chem.visitor.id];
    expected.sort();
    assert_eq!(h.permission_roles(dir.id), expected);
    assert_eq!(h.permission_roles(note.id), expected);
    assert_eq!(h.stored(note.id).unwrap().workspace, chem.workspace.id);

    let bio_visitor = h.user("bio-visitor");
    h.tree
        .access()
        .associate_roles(&[bio_visitor.id], &[bio.visitor.id])
        .unwrap();
    h.sign_in(bio_visitor.id);
    assert!(!h.tree.access().check(note.id, &Capability::Open).unwrap());
}

#[test]
fn test_role_directory_lifecycle() {
    let h = Harness::new();
    let (owner, ws) = h.workspace("owner", "Biology", "BIO");
    let role = h
        .tree
        .access()
        .create_workspace_role(ws.workspace.id, "Student", true)
        .unwrap();
    assert!(role.name.starts_with("ROLE_WS_STUDENT_"));
    assert_eq!(role.translation_key, "Student");

    let directory = h
        .tree
        .query()
        .children(Some(ws.root.id), Some("directory"))
        .unwrap()
        .remove(0);
    assert_eq!(directory.name, "Student");

    let student = h.user("student");
    h.tree
        .access()
        .associate_roles(&[student.id], &[role.id])
        .unwrap();

    h.sign_in(student.id);
    let work = h
        .tree
        .tree()
        .create(directory.id, "activity", NodeMetadata::named("Homework"))
        .unwrap();
    assert!(matches!(
        h.tree.tree().create(ws.root.id, "text", NodeMetadata::named("x")),
        Err(TreeError::PermissionDenied(_))
    ));

    h.sign_in(owner.id);
    let removed = h.tree.access().remove_role(ws.workspace.id, role.id).unwrap();
    assert_eq!(removed.removed_memberships, 1);
    assert!(h.permission_roles(work.id).iter().all(|r| *r != role.id));

    h.sign_in(student.id);
    assert!(!h.tree.access().check(directory.id, &Capability::Open).unwrap());
}

#[test]
fn test_last_manager_cannot_leave() {
    let h = Harness::new();
    let (owner, ws) = h.workspace("owner", "Biology", "BIO");

    assert!(matches!(
        h.tree
            .access()
            .dissociate_role(Subject::User(owner.id), ws.manager.id),
        Err(TreeError::LastManager(_))
    ));
    assert!(h.tree.access().check(ws.root.id, &Capability::Edit).unwrap());

    let deputy = h.user("deputy");
    h.tree
        .access()
        .associate_roles(&[deputy.id], &[ws.manager.id])
        .unwrap();
    assert!(h
        .tree
        .access()
        .dissociate_role(Subject::User(owner.id), ws.manager.id)
        .unwrap());
    assert!(!h.tree.access().check(ws.root.id, &Capability::Edit).unwrap());
}

#[test]
fn test_group_membership_grants_rights() {
    let h = Harness::new();
    let (owner, ws) = h.workspace("owner", "Biology", "BIO");
    let member = h.user("member");

    h.sign_in_admin(owner.id);
    let group = h.tree.access().register_group("Lab partners").unwrap();
    h.tree.access().add_user_to_group(group.id, member.id).unwrap();
    h.sign_in(owner.id);
    h.tree
        .access()
        .add_role_to_groups(ws.collaborator.id, &[group.id])
        .unwrap();

    h.sign_in(member.id);
    let rights = h.tree.access().effective_rights(ws.root.id).unwrap();
    assert!(rights.allows(&Capability::Open));
    assert!(rights.allows(&Capability::Export));
    assert!(!rights.allows(&Capability::Edit));

    let roots = h.tree.query().roots().unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, ws.root.id);
}
