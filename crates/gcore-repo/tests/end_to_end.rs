use gcore_refs::RefFilter;
use gcore_repo::Repository;
use gcore_store::{Commit, EntryMode, ObjectKind, Tree, TreeEntry};
use gcore_types::{ErrorCode, ObjectId, Signature, Time};

fn sig() -> Signature {
    Signature::new("Test", "test@example.com", Time::new(1_700_000_000, 0)).unwrap()
}

#[test]
fn blob_tree_commit_and_branch() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();

    let oid_h = repo.write_blob(b"hello").unwrap();
    assert_eq!(oid_h.to_hex(), "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0");
    assert!(dir
        .path()
        .join(".git/objects/b6/fc4c620b67d95f953a5c1c1230aaab5db5a1b0")
        .is_file());

    let oid_t = repo
        .write_tree(&Tree::new(vec![TreeEntry::new(EntryMode::Regular, "a.txt", oid_h)]))
        .unwrap();
    let oid_c = repo
        .write_commit(&Commit::new(oid_t, vec![], sig(), sig(), "initial\n"), None)
        .unwrap();
    repo.reference_create("refs/heads/main", oid_c, false, "branch: Created from scratch")
        .unwrap();

    let resolved = repo.reference_lookup_resolved("refs/heads/main", None).unwrap();
    assert_eq!(resolved.id(), Some(&oid_c));
    assert_eq!(repo.reference_name_to_id("HEAD").unwrap(), oid_c);

    let raw = repo.odb().read(&oid_t).unwrap();
    assert_eq!(raw.kind, ObjectKind::Tree);
    let tree = Tree::parse(&raw.data).unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.entries()[0].name, "a.txt");
    assert_eq!(tree.entries()[0].id, oid_h);

    let (peeled, commit) = repo.peel_to_commit("HEAD").unwrap();
    assert_eq!(peeled, oid_c);
    assert_eq!(commit.tree, oid_t);
}

#[test]
fn corrupted_loose_object_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    let id = repo.write_blob(b"some content worth corrupting").unwrap();

    let path = dir.path().join(".git/objects").join(id.fmt_path());
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x40;
    std::fs::write(&path, bytes).unwrap();

    let reopened = Repository::open(dir.path()).unwrap();
    let err = reopened.lookup_blob(&id).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Corrupted);
}

#[test]
fn reference_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    let a = repo.write_blob(b"a").unwrap();

    repo.reference_create("refs/heads/feature", a, false, "").unwrap();
    let err = repo
        .reference_create("refs/heads/feature", a, false, "")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AlreadyExists);

    repo.reference_rename("refs/heads/feature", "refs/heads/renamed", false, "rename")
        .unwrap();
    assert_eq!(
        repo.reference_lookup("refs/heads/feature").unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(repo.reference_name_to_id("refs/heads/renamed").unwrap(), a);

    repo.reference_delete("refs/heads/renamed").unwrap();
    assert_eq!(
        repo.reference_lookup("refs/heads/renamed").unwrap_err().code(),
        ErrorCode::NotFound
    );

    let err = repo
        .reference_create("refs/heads/bad..name", a, false, "")
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidName);
}

#[test]
fn symbolic_chains_respect_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    let id = repo.write_blob(b"target").unwrap();
    repo.reference_create("refs/heads/l0", id, false, "").unwrap();
    for i in 1..=6 {
        repo.reference_symbolic_create(
            &format!("refs/heads/l{i}"),
            &format!("refs/heads/l{}", i - 1),
            false,
            "",
        )
        .unwrap();
    }

    let five = repo.reference_lookup_resolved("refs/heads/l5", None).unwrap();
    assert_eq!(five.id(), Some(&id));
    let err = repo
        .reference_lookup_resolved("refs/heads/l6", None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TooManyRedirects);
    let raw = repo.reference_lookup_resolved("refs/heads/l6", Some(0)).unwrap();
    assert!(raw.is_symbolic());

    let mut symbolic = 0;
    repo.reference_foreach(RefFilter::Symbolic, |r| {
        assert!(r.is_symbolic());
        symbolic += 1;
        true
    })
    .unwrap();
    assert_eq!(symbolic, 6);
}

#[test]
fn short_id_has_minimum_length() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    let id = repo.write_blob(b"lonely").unwrap();
    assert_eq!(repo.short_id(&id).unwrap(), id.to_hex_prefix(7));
    let missing = ObjectId::from_hex("0123456789abcdef0123456789abcdef01234567").unwrap();
    assert_eq!(repo.short_id(&missing).unwrap().len(), 7);
}
