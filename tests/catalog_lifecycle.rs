mod support;

use std::path::{Path, PathBuf};

use folio_store::db::progress_rows;
use folio_store::{Book, BookUpdate, DeletePolicy, ImportOutcome, ImportRequest, IngestError};
use support::{write_epub, Harness};

/// A PDF root and its EPUB sibling sharing one generated cover.
fn format_group(harness: &Harness) -> (Book, Book) {
    let pdf = harness.request("baz.pdf", b"%PDF-1.4 baz", "Baz", "Qux");
    let root = match harness.library.import_file(&pdf) {
        ImportOutcome::Imported { book, .. } => book,
        other => panic!("pdf import: {:?}", other),
    };
    let epub = harness.inbox.join("baz.epub");
    write_epub(&epub, "Baz", "Qux", None);
    let child = match harness.library.import_file(&ImportRequest::new(&epub, "u1")) {
        ImportOutcome::Imported { book, .. } => book,
        other => panic!("epub import: {:?}", other),
    };
    assert_eq!(child.parent_book_id.as_deref(), Some(root.id.as_str()));
    (root, child)
}

fn dir_of(book: &Book) -> PathBuf {
    Path::new(&book.file_path)
        .parent()
        .expect("book directory")
        .to_path_buf()
}

#[test]
fn cascade_delete_removes_the_whole_group() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);
    let cover = root.cover_url.clone().expect("cover");
    harness
        .library
        .record_progress("u1", &child.id, Some("epubcfi(/6/4)"), 0.4)
        .expect("progress");

    let report = harness
        .library
        .delete_book(&root.id, DeletePolicy::Cascade)
        .expect("delete");

    assert_eq!(report.deleted, vec![child.id.clone(), root.id.clone()]);
    assert!(report.promoted.is_none());
    assert!(harness.library.books().expect("books").is_empty());
    assert!(!Path::new(&cover).exists());
    assert!(!dir_of(&root).exists());
    assert!(harness.stored_files().is_empty());
    assert_eq!(progress_rows(harness.library.connection(), &child.id).expect("count"), 0);
}

#[test]
fn deleting_a_root_promotes_the_oldest_sibling() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);
    let cover = root.cover_url.clone().expect("cover");

    let report = harness
        .library
        .delete_book(&root.id, DeletePolicy::Promote)
        .expect("delete");

    assert_eq!(report.deleted, vec![root.id.clone()]);
    assert_eq!(report.promoted.as_deref(), Some(child.id.as_str()));
    let heir = harness.library.book(&child.id).expect("heir");
    assert!(heir.is_root());
    assert!(!Path::new(&root.file_path).exists());
    assert!(Path::new(&heir.file_path).is_file());
    assert!(Path::new(&cover).is_file(), "cover is still used by the heir");
}

#[test]
fn deleting_a_child_leaves_the_root_alone() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);

    let report = harness
        .library
        .delete_book(&child.id, DeletePolicy::Cascade)
        .expect("delete");

    assert_eq!(report.deleted, vec![child.id.clone()]);
    assert!(!Path::new(&child.file_path).exists());
    let kept = harness.library.book(&root.id).expect("root");
    assert_eq!(kept.file_path, root.file_path);
    assert!(kept.is_root());
    assert!(Path::new(&kept.file_path).is_file());
    assert!(Path::new(kept.cover_url.as_deref().expect("cover")).is_file());
}

#[test]
fn deleting_a_private_book_clears_shelf_and_progress() {
    let harness = Harness::new();
    let mut request = harness.request("diary.pdf", b"%PDF-1.4 diary", "Diary", "Me");
    request.is_public = false;
    request.owner_name = Some("alice".to_string());
    let book = match harness.library.import_file(&request) {
        ImportOutcome::Imported { book, .. } => book,
        other => panic!("import: {:?}", other),
    };
    harness
        .library
        .record_progress("u1", &book.id, None, 1.7)
        .expect("progress");
    assert_eq!(harness.library.shelf("u1").expect("shelf"), vec![book.id.clone()]);

    harness
        .library
        .delete_book(&book.id, DeletePolicy::default())
        .expect("delete");

    assert!(harness.library.shelf("u1").expect("shelf").is_empty());
    assert_eq!(progress_rows(harness.library.connection(), &book.id).expect("count"), 0);
    assert!(!harness.storage().join("private/alice").exists());
}

#[test]
fn category_change_moves_every_format_and_the_cover() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);
    let old_dir = dir_of(&root);

    let update = BookUpdate {
        category: Some("Science Fiction".to_string()),
        ..BookUpdate::default()
    };
    let updated = harness.library.update_book(&child.id, &update).expect("update");

    let new_dir = harness.storage().join("public/Science Fiction/Qux - Baz");
    assert_eq!(dir_of(&updated), new_dir);
    let root = harness.library.book(&root.id).expect("root");
    assert_eq!(dir_of(&root), new_dir);
    assert_eq!(root.category, "Science Fiction");
    assert!(Path::new(&root.file_path).is_file());
    assert!(Path::new(&updated.file_path).is_file());

    let cover = root.cover_url.clone().expect("cover");
    assert_eq!(Path::new(&cover).parent(), Some(new_dir.as_path()));
    assert!(Path::new(&cover).is_file());
    assert_eq!(updated.cover_url, root.cover_url);
    assert!(!old_dir.exists());
}

#[test]
fn going_private_files_the_group_under_the_owner() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);

    let update = BookUpdate {
        is_public: Some(false),
        owner_name: Some("alice".to_string()),
        ..BookUpdate::default()
    };
    harness.library.update_book(&root.id, &update).expect("update");

    let private_dir = harness.storage().join("private/alice/Uncategorized/Qux - Baz");
    for id in [&root.id, &child.id] {
        let book = harness.library.book(id).expect("book");
        assert!(!book.is_public);
        assert_eq!(dir_of(&book), private_dir);
        assert!(Path::new(&book.file_path).is_file());
    }
    assert!(!harness.storage().join("public").exists());

    // the owner is read back off the path for later edits
    let update = BookUpdate {
        category: Some("Journal".to_string()),
        ..BookUpdate::default()
    };
    let moved = harness.library.update_book(&root.id, &update).expect("update");
    assert_eq!(
        dir_of(&moved),
        harness.storage().join("private/alice/Journal/Qux - Baz")
    );
}

#[test]
fn retitling_renames_files_and_keeps_the_group() {
    let harness = Harness::new();
    let (root, child) = format_group(&harness);

    let update = BookUpdate {
        title: Some("Baz Returns".to_string()),
        description: Some("sequel".to_string()),
        ..BookUpdate::default()
    };
    let updated = harness.library.update_book(&root.id, &update).expect("update");

    assert_eq!(updated.file_name, "Baz Returns.pdf");
    assert_eq!(updated.description.as_deref(), Some("sequel"));
    let child = harness.library.book(&child.id).expect("child");
    assert_eq!(child.title, "Baz Returns");
    assert_eq!(child.file_name, "Baz Returns.epub");
    assert!(child.description.is_none());
    assert_eq!(child.parent_book_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(
        dir_of(&child),
        harness.storage().join("public/Uncategorized/Qux - Baz Returns")
    );
}

#[test]
fn retitling_onto_another_book_is_refused() {
    let harness = Harness::new();
    let (root, _) = format_group(&harness);
    let other = harness.request("other.pdf", b"%PDF-1.4 other", "Other", "Qux");
    assert!(matches!(
        harness.library.import_file(&other),
        ImportOutcome::Imported { .. }
    ));
    let files_before = harness.stored_files();

    let update = BookUpdate {
        title: Some("Other".to_string()),
        ..BookUpdate::default()
    };
    let result = harness.library.update_book(&root.id, &update);

    assert!(matches!(result, Err(IngestError::Validation(_))));
    assert_eq!(harness.stored_files(), files_before);
    assert_eq!(harness.library.book(&root.id).expect("root").title, "Baz");
}

#[test]
fn retitling_onto_another_format_group_is_refused() {
    let harness = Harness::new();
    let dune = harness.request("dune.pdf", b"%PDF-1.4 dune", "Dune", "Herbert");
    let dune = match harness.library.import_file(&dune) {
        ImportOutcome::Imported { book, .. } => book,
        other => panic!("pdf import: {:?}", other),
    };
    let draft = harness.request("draft.md", b"# Draft", "Draft", "Herbert");
    let draft = match harness.library.import_file(&draft) {
        ImportOutcome::Imported { book, .. } => book,
        other => panic!("md import: {:?}", other),
    };
    let files_before = harness.stored_files();

    let update = BookUpdate {
        title: Some("Dune".to_string()),
        ..BookUpdate::default()
    };
    let result = harness.library.update_book(&draft.id, &update);

    assert!(matches!(result, Err(IngestError::Validation(_))));
    assert_eq!(harness.stored_files(), files_before);
    let kept = harness.library.book(&draft.id).expect("draft");
    assert_eq!(kept.title, "Draft");
    assert_eq!(kept.file_path, draft.file_path);
    let roots: Vec<Book> = harness
        .library
        .books()
        .expect("books")
        .into_iter()
        .filter(|book| book.title == "Dune" && book.author == "Herbert")
        .collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, dune.id);
}

#[test]
fn descriptive_edits_do_not_move_files() {
    let harness = Harness::new();
    let (root, _) = format_group(&harness);

    let update = BookUpdate {
        publisher: Some("Ace".to_string()),
        tags: Some(vec!["classic".to_string()]),
        rating: Some(4.5),
        ..BookUpdate::default()
    };
    let updated = harness.library.update_book(&root.id, &update).expect("update");

    assert_eq!(updated.file_path, root.file_path);
    assert_eq!(updated.publisher.as_deref(), Some("Ace"));
    assert_eq!(updated.tags, vec!["classic".to_string()]);
    assert_eq!(updated.rating, Some(4.5));
}

#[test]
fn missing_books_are_reported() {
    let harness = Harness::new();
    assert!(matches!(
        harness.library.delete_book("nope", DeletePolicy::Cascade),
        Err(IngestError::NotFound(_))
    ));
    assert!(matches!(
        harness.library.update_book("nope", &BookUpdate::default()),
        Err(IngestError::NotFound(_))
    ));
    assert!(matches!(
        harness.library.record_progress("u1", "nope", None, 0.5),
        Err(IngestError::NotFound(_))
    ));
}

#[test]
fn history_survives_deletes_and_can_be_purged() {
    let harness = Harness::new();
    let (root, _) = format_group(&harness);
    harness
        .library
        .delete_book(&root.id, DeletePolicy::Cascade)
        .expect("delete");

    let history = harness.library.history(Some("u1"), 10).expect("history");
    assert_eq!(history.len(), 2);
    let stats = harness.library.history_stats().expect("stats");
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status.get("success"), Some(&2));
    assert_eq!(stats.by_format.get("pdf"), Some(&1));
    assert_eq!(stats.by_format.get("epub"), Some(&1));

    let removed = harness
        .library
        .purge_history(i64::MAX)
        .expect("purge");
    assert_eq!(removed, 2);
    assert!(harness.library.history(None, 10).expect("history").is_empty());
}
