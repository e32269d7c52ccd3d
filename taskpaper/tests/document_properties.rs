use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use rstest::rstest;
use taskpaper::core::{HierarchyError, ItemType, Tag, TagPosition};
use taskpaper::tags::{extract_tags, insert_tag, remove_all_tag_markup, remove_tag};
use taskpaper::{TaskPaperDocument, format_items, parse_taskpaper_from_str};

#[rstest]
#[case("Project:")]
#[case("Project:\n\t- Task @next\n\t\tnote @due(2025-01-01)")]
#[case("- a\n\t- b\n\t\t- c\n\t- d\ne")]
#[case("Unicode ✓:\n\t- café @lieu(Zürich)")]
fn serialize_inverts_parse(#[case] text: &str) {
    assert_eq!(format_items(&parse_taskpaper_from_str(text)), text);
}

#[rstest]
#[case("x @done y", "done")]
#[case("x @done(1) @done(2) y", "done")]
#[case("nothing to see", "done")]
#[case("- @a@b @a", "a")]
fn remove_tag_is_idempotent(#[case] text: &str, #[case] name: &str) {
    let once = remove_tag(text, name);
    assert_eq!(remove_tag(&once, name), once);
    assert!(extract_tags(&once).iter().all(|tag| tag.name != name));
}

#[rstest]
#[case("- Buy milk", TagPosition::End)]
#[case("- Buy milk @next", TagPosition::Beginning)]
#[case("- Buy milk", TagPosition::At(5))]
#[case("- Buy milk", TagPosition::After(5))]
fn inserting_a_tag_twice_restores_tags(#[case] text: &str, #[case] position: TagPosition) {
    let tag = Tag::with_value("due", "today");
    let once = insert_tag(text, ItemType::Task, &tag, position);
    assert!(extract_tags(&once).contains(&tag));
    let twice = insert_tag(&once, ItemType::Task, &tag, position);
    assert_eq!(extract_tags(&twice), extract_tags(text));
}

#[test]
fn stripped_markup_has_no_tags_or_double_spaces() {
    let stripped = remove_all_tag_markup("  a @x  b @y(some value) c @z ");
    assert_eq!(stripped, "a b c");
    assert!(extract_tags(&stripped).is_empty());
}

#[test]
fn indent_then_outdent_is_identity() {
    let mut doc = TaskPaperDocument::new("A:\n\t- one\n\t\t- two\n\t\t\tnote\n\t- three", "t");
    let before = doc.content();
    let one = doc.items()[1].id;
    doc.indent(one);
    assert_eq!(doc.content(), "A:\n\t\t- one\n\t\t\t- two\n\t\t\t\tnote\n\t- three");
    doc.outdent(one);
    assert_eq!(doc.content(), before);
}

#[test]
fn structural_edits_keep_a_valid_forest() {
    let mut doc = TaskPaperDocument::new(
        "A:\n\t- a1\n\t\t- a1.1\n\t- a2\nB:\n\t- b1\n\t\t- b1.1\nC:",
        "t",
    );
    let ids: Vec<_> = doc.items().iter().map(|item| item.id).collect();
    for id in &ids {
        doc.move_down(*id);
        doc.move_up(*id);
        doc.indent(*id);
        doc.outdent(*id);
    }
    let mut remaining: Vec<_> = doc.items().iter().map(|item| item.id).collect();
    let mut expected = ids.clone();
    remaining.sort();
    expected.sort();
    assert_eq!(remaining, expected);
    for id in &ids {
        let block = doc.block(*id).unwrap();
        let level = doc.get(*id).unwrap().indent_level;
        for index in block.start + 1..=block.last() {
            assert!(doc.items()[index].indent_level > level);
        }
    }
}

#[test]
fn move_hierarchy_rejects_own_descendant() {
    let mut doc = TaskPaperDocument::new("A:\n\t- a1\n\t\t- a1.1\nB:", "t");
    let a = doc.items()[0].id;
    let deep = doc.items()[2].id;
    let before = doc.content();
    assert_eq!(doc.move_hierarchy(a, deep), Err(HierarchyError::NoValidDestination));
    assert_eq!(doc.content(), before);
}

#[test]
fn completion_toggle_round_trip() {
    let mut doc = TaskPaperDocument::new("Chores:\n\t- Sweep @home", "t");
    let task = doc.items()[1].id;
    let tags_before = doc.get(task).unwrap().tags().into_owned();
    let date = NaiveDate::from_ymd_opt(2025, 6, 23).unwrap();

    doc.toggle_task_completion_on(task, date);
    assert_eq!(
        doc.get(task).unwrap().tag("done"),
        Some(Tag::with_value("done", "2025-06-23"))
    );
    assert_eq!(doc.stats().completed_tasks, 1);

    doc.toggle_task_completion_on(task, date);
    assert_eq!(doc.get(task).unwrap().tags().into_owned(), tags_before);
    assert_eq!(doc.stats().completed_tasks, 0);
}

#[test]
fn quick_add_into_trailing_inbox_goes_first() {
    let mut doc = TaskPaperDocument::new("", "new");
    doc.quick_add("first", ItemType::Task);
    doc.quick_add("second", ItemType::Task);
    assert_eq!(doc.content(), "Inbox:\n\t- second\n\t- first");

    let mut doc = TaskPaperDocument::new("Inbox:\n\t- first\nWork:", "old");
    doc.quick_add("second", ItemType::Task);
    assert_eq!(doc.content(), "Inbox:\n\t- first\n\t- second\nWork:");
}
