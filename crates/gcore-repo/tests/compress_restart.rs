use gcore_refs::{RefFilter, RefTarget};
use gcore_repo::Repository;
use gcore_store::{ObjectKind, Tag};
use gcore_types::{Signature, Time};

fn snapshot(repo: &Repository) -> Vec<(String, RefTarget)> {
    let mut refs = Vec::new();
    repo.reference_foreach(RefFilter::All, |r| {
        refs.push((r.name.clone(), r.target.clone()));
        true
    })
    .unwrap();
    refs.sort_by(|a, b| a.0.cmp(&b.0));
    refs
}

#[test]
fn compress_then_reopen_keeps_enumeration() {
    let dir = tempfile::tempdir().unwrap();
    let before = {
        let repo = Repository::init(dir.path(), false).unwrap();
        let ids: Vec<_> = (0..5)
            .map(|i| repo.write_blob(format!("object {i}").as_bytes()).unwrap())
            .collect();
        repo.reference_create("refs/heads/main", ids[0], false, "").unwrap();
        repo.reference_create("refs/heads/feature/a", ids[1], false, "").unwrap();
        repo.reference_create("refs/remotes/origin/main", ids[2], false, "").unwrap();
        repo.reference_create("refs/tags/light", ids[3], false, "").unwrap();
        let tagger = Signature::new("T", "t@example.com", Time::new(1, 0)).unwrap();
        let tag = Tag::new(ids[4], ObjectKind::Blob, "annotated", Some(tagger), "msg\n");
        let tag_id = repo.write_tag(&tag).unwrap();
        repo.reference_create("refs/tags/annotated", tag_id, false, "").unwrap();
        repo.reference_symbolic_create("refs/remotes/origin/HEAD", "refs/remotes/origin/main", false, "")
            .unwrap();

        let before = snapshot(&repo);
        repo.reference_compress().unwrap();
        assert_eq!(snapshot(&repo), before);
        before
    };

    let git = dir.path().join(".git");
    assert!(git.join("packed-refs").is_file());
    assert!(!git.join("refs/heads/main").exists());
    assert!(git.join("refs/remotes/origin/HEAD").is_file());

    let reopened = Repository::open(dir.path()).unwrap();
    assert_eq!(snapshot(&reopened), before);

    let tag = reopened.reference_lookup("refs/tags/annotated").unwrap();
    assert!(tag.peeled.is_some());
    let light = reopened.reference_lookup("refs/tags/light").unwrap();
    assert!(light.peeled.is_none());
}

#[test]
fn loose_update_shadows_packed_entry() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path(), false).unwrap();
    let old = repo.write_blob(b"old").unwrap();
    let new = repo.write_blob(b"new").unwrap();
    repo.reference_create("refs/heads/main", old, false, "").unwrap();
    repo.reference_compress().unwrap();

    repo.reference_create("refs/heads/main", new, true, "move").unwrap();
    assert_eq!(repo.reference_name_to_id("refs/heads/main").unwrap(), new);

    let names = repo.refdb().list().unwrap();
    assert_eq!(names, vec!["refs/heads/main".to_string()]);

    repo.reference_delete("refs/heads/main").unwrap();
    let reopened = Repository::open(dir.path()).unwrap();
    assert!(reopened.reference_lookup("refs/heads/main").is_err());
}

#[test]
fn rename_of_packed_reference_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let repo = Repository::init(dir.path(), false).unwrap();
        let id = repo.write_blob(b"x").unwrap();
        repo.reference_create("refs/heads/old", id, false, "").unwrap();
        repo.reference_compress().unwrap();
        repo.reference_rename("refs/heads/old", "refs/heads/new", false, "rename")
            .unwrap();
    }
    let repo = Repository::open(dir.path()).unwrap();
    assert!(repo.reference_lookup("refs/heads/old").is_err());
    assert!(repo.reference_lookup("refs/heads/new").is_ok());
}
