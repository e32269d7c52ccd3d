//! TaskPaper outline library.
//! Items live in one flat, pre-order sequence; depth is an integer and every
//! structural edit re-derives block boundaries from consecutive indent levels.

pub mod core {
    use chrono::NaiveDate;
    use serde::{Deserialize, Serialize};
    use serde_with::{DeserializeFromStr, SerializeDisplay};
    use std::{borrow::Cow, fmt, ops::Range, str::FromStr};
    use uuid::Uuid;

    use crate::tags;

    /// Tag name that marks an item as completed.
    pub const DONE_TAG: &str = "done";

    /* ------------------------------- IDs ------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ItemId(pub Uuid);

    impl ItemId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    /* ----------------------------- Item types ----------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum ItemType {
        Project,
        Task,
        Note,
    }

    impl ItemType {
        pub const TASK_PREFIX: &'static str = "- ";
        pub const PROJECT_SUFFIX: &'static str = ":";

        /// Classify an already trimmed line. Unrecognised shapes are notes.
        pub fn classify(text: &str) -> Self {
            if text.ends_with(Self::PROJECT_SUFFIX) {
                ItemType::Project
            } else if text.starts_with(Self::TASK_PREFIX) {
                ItemType::Task
            } else {
                ItemType::Note
            }
        }

        /// Wrap plain text in this type's markup unless it is already present.
        pub fn apply_markup(self, text: &str) -> String {
            match self {
                ItemType::Project if !text.ends_with(Self::PROJECT_SUFFIX) => {
                    format!("{text}{}", Self::PROJECT_SUFFIX)
                }
                ItemType::Task if !text.starts_with(Self::TASK_PREFIX) => {
                    format!("{}{text}", Self::TASK_PREFIX)
                }
                _ => text.to_string(),
            }
        }

        /// Remove this type's markup from `text`, trimming what is left.
        pub fn strip_markup(self, text: &str) -> String {
            let stripped = match self {
                ItemType::Project => text.strip_suffix(Self::PROJECT_SUFFIX).unwrap_or(text),
                ItemType::Task => text.strip_prefix(Self::TASK_PREFIX).unwrap_or(text),
                ItemType::Note => text,
            };
            stripped.trim().to_string()
        }
    }

    impl fmt::Display for ItemType {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let label = match self {
                ItemType::Project => "project",
                ItemType::Task => "task",
                ItemType::Note => "note",
            };
            f.pad(label)
        }
    }

    /* -------------------------------- Tags -------------------------------- */

    /// Inline `@name` or `@name(value)` annotation. Serialized in display form.
    #[derive(
        Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, SerializeDisplay, DeserializeFromStr,
    )]
    pub struct Tag {
        pub name: String,
        pub value: Option<String>,
    }

    impl Tag {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                value: None,
            }
        }

        pub fn with_value(name: impl Into<String>, value: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                value: Some(value.into()),
            }
        }

        pub fn display_text(&self) -> String {
            self.to_string()
        }
    }

    impl fmt::Display for Tag {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match &self.value {
                Some(value) => write!(f, "@{}({})", self.name, value),
                None => write!(f, "@{}", self.name),
            }
        }
    }

    impl FromStr for Tag {
        type Err = TagParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            tags::parse_single_tag(s.trim()).ok_or_else(|| TagParseError(s.to_string()))
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("{0:?} is not a tag (expected @name or @name(value))")]
    pub struct TagParseError(pub String);

    /// Where `insert_tag` places a tag. Offsets are byte offsets into the raw text.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum TagPosition {
        /// Right after the type prefix (`- ` for tasks), otherwise offset 0.
        Beginning,
        #[default]
        End,
        At(usize),
        After(usize),
    }

    /* -------------------------------- Items -------------------------------- */

    /// One parsed line.
    ///
    /// `raw_text` keeps the full markup and inline tags and is the only source
    /// of truth; the tag list is a cache that is rebuilt whenever it changes.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct Item {
        pub id: ItemId,
        pub kind: ItemType,
        raw_text: String,
        pub indent_level: usize,
        /// 1-based source line, for items that came from the parser.
        #[serde(default)]
        pub line_number: Option<usize>,
        #[serde(skip)]
        tags_cache: Option<Vec<Tag>>,
    }

    impl Item {
        pub fn new(kind: ItemType, raw_text: impl Into<String>, indent_level: usize) -> Self {
            let raw_text = raw_text.into();
            let tags_cache = Some(tags::extract_tags(&raw_text));
            Self {
                id: ItemId::new(),
                kind,
                raw_text,
                indent_level,
                line_number: None,
                tags_cache,
            }
        }

        /// Build an item from plain text, adding the `- ` / `:` markup for its type.
        pub fn with_markup(kind: ItemType, text: &str, indent_level: usize) -> Self {
            Self::new(kind, kind.apply_markup(text.trim()), indent_level)
        }

        pub fn raw_text(&self) -> &str {
            &self.raw_text
        }

        /// Replace the raw text. The type is kept; tags are re-read.
        pub fn set_raw_text(&mut self, text: impl Into<String>) {
            self.raw_text = text.into();
            self.refresh_tags();
        }

        pub fn refresh_tags(&mut self) {
            self.tags_cache = Some(tags::extract_tags(&self.raw_text));
        }

        pub fn tags(&self) -> Cow<'_, [Tag]> {
            match &self.tags_cache {
                Some(cached) => Cow::Borrowed(cached.as_slice()),
                None => Cow::Owned(tags::extract_tags(&self.raw_text)),
            }
        }

        pub fn has_tag(&self, name: &str) -> bool {
            self.tags().iter().any(|t| t.name == name)
        }

        /// First tag with the given name.
        pub fn tag(&self, name: &str) -> Option<Tag> {
            self.tags().iter().find(|t| t.name == name).cloned()
        }

        /// Whether the item carries `done_tag`, with or without a date.
        pub fn is_completed(&self, done_tag: &str) -> bool {
            self.has_tag(done_tag)
        }

        /// Text without type markup or tags.
        pub fn display_text(&self) -> String {
            let without_tags = tags::remove_all_tag_markup(&self.raw_text);
            self.kind.strip_markup(&without_tags)
        }

        /// Add `tag`, replacing any tag with the same name. Adding a tag that is
        /// already present with the same value removes it instead.
        pub fn add_tag(&mut self, tag: &Tag, position: TagPosition) {
            let text = tags::insert_tag(&self.raw_text, self.kind, tag, position);
            self.set_raw_text(text);
        }

        pub fn remove_tag(&mut self, name: &str) {
            let text = tags::remove_tag(&self.raw_text, name);
            self.set_raw_text(text);
        }

        /// Mark done with `stamp` as the tag value, or drop every `done_tag`.
        pub fn set_completion(&mut self, done_tag: &str, completed: bool, stamp: &str) {
            if completed {
                let text = tags::remove_tag(&self.raw_text, done_tag);
                let text = tags::insert_tag(
                    &text,
                    self.kind,
                    &Tag::with_value(done_tag, stamp),
                    TagPosition::End,
                );
                self.set_raw_text(text);
            } else {
                self.remove_tag(done_tag);
            }
        }

        /// The persisted line: one tab per indent level, then the raw text.
        pub fn line(&self) -> String {
            let mut buf = "\t".repeat(self.indent_level);
            buf.push_str(&self.raw_text);
            buf
        }
    }

    /* ------------------------------ Planning ------------------------------ */

    /// A contiguous run of indices, `start..start + len`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct IndexRange {
        pub start: usize,
        pub len: usize,
    }

    impl IndexRange {
        /// Range covering `start..=last`.
        pub fn inclusive(start: usize, last: usize) -> Self {
            debug_assert!(last >= start);
            Self {
                start,
                len: last - start + 1,
            }
        }

        pub fn single(index: usize) -> Self {
            Self {
                start: index,
                len: 1,
            }
        }

        /// Last index inside the range.
        pub fn last(&self) -> usize {
            self.start + self.len - 1
        }

        pub fn contains(&self, index: usize) -> bool {
            index >= self.start && index < self.start + self.len
        }

        pub fn as_range(&self) -> Range<usize> {
            self.start..self.start + self.len
        }
    }

    /// Block to lift and the index it is reinserted before.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MoveUpPlan {
        pub moving: IndexRange,
        pub insert_at: usize,
    }

    /// Block to lower and the index it ends up following.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct MoveDownPlan {
        pub moving: IndexRange,
        pub after: usize,
    }

    /* ---------------------------- Errors (domain) ---------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
    pub enum HierarchyError {
        #[error("the item to move is not in the document")]
        ItemsNotFound,
        #[error("the drop destination is not a valid item in the document")]
        NoValidDestination,
    }

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    pub enum SettingsError {
        #[error("inbox name must not be empty")]
        EmptyInboxName,
        #[error("{0:?} is not a valid tag name")]
        InvalidDoneTag(String),
        #[error("{0:?} is not a valid date format")]
        InvalidDateFormat(String),
    }

    /* ------------------------------ Settings ------------------------------ */

    /// Document-wide knobs. Missing fields fall back to the TaskPaper defaults.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(default)]
    pub struct Settings {
        /// Project that `quick_add` files new items under.
        pub inbox_name: String,
        /// Completion marker tag.
        pub done_tag: String,
        /// chrono format string for completion dates.
        pub date_format: String,
        pub quick_add_indent: usize,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                inbox_name: "Inbox".to_string(),
                done_tag: DONE_TAG.to_string(),
                date_format: "%Y-%m-%d".to_string(),
                quick_add_indent: 1,
            }
        }
    }

    impl Settings {
        pub fn validate(&self) -> Result<(), SettingsError> {
            if self.inbox_name.trim().is_empty() {
                return Err(SettingsError::EmptyInboxName);
            }
            if self.done_tag.is_empty() || !self.done_tag.chars().all(tags::is_tag_name_char) {
                return Err(SettingsError::InvalidDoneTag(self.done_tag.clone()));
            }
            let broken = chrono::format::StrftimeItems::new(&self.date_format)
                .any(|item| matches!(item, chrono::format::Item::Error));
            if broken {
                return Err(SettingsError::InvalidDateFormat(self.date_format.clone()));
            }
            Ok(())
        }

        /// Format a completion date, falling back to ISO dates on a bad format.
        pub fn format_date(&self, date: NaiveDate) -> String {
            use std::fmt::Write;
            let mut out = String::new();
            if write!(out, "{}", date.format(&self.date_format)).is_err() {
                return date.format("%Y-%m-%d").to_string();
            }
            out
        }
    }

}

pub mod tags {
    //! Inline tag codec.
    //!
    //! Tags are recognised with a small `nom` scanner that reports byte spans;
    //! extraction, removal and markup stripping all run off the same spans so
    //! they agree on what counts as a tag. There is no escaping: any substring
    //! matching `@name` or `@name(value)` is a tag.

    use crate::core::{ItemType, Tag, TagPosition};
    use nom::{
        IResult,
        bytes::complete::{is_not, take_while1},
        character::complete::char,
        combinator::{all_consuming, map, opt},
        sequence::{delimited, pair, preceded},
    };
    use std::ops::Range;

    type PResult<'a, T> = IResult<&'a str, T>;

    /// A tag occurrence and the bytes it covers in the scanned text.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TagSpan {
        pub tag: Tag,
        pub range: Range<usize>,
    }

    pub fn is_tag_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    fn parse_tag(i: &str) -> PResult<'_, Tag> {
        map(
            pair(
                preceded(char('@'), take_while1(is_tag_name_char)),
                opt(delimited(char('('), is_not(")"), char(')'))),
            ),
            |(name, value): (&str, Option<&str>)| Tag {
                name: name.to_string(),
                value: value.map(str::to_string),
            },
        )(i)
    }

    /// Parse a string that must be exactly one tag.
    pub fn parse_single_tag(s: &str) -> Option<Tag> {
        all_consuming(parse_tag)(s).ok().map(|(_, tag)| tag)
    }

    /// Every tag in `text`, left to right.
    pub fn scan_tags(text: &str) -> Vec<TagSpan> {
        let mut out = Vec::new();
        let mut offset = 0;
        while let Some(found) = text[offset..].find('@') {
            let start = offset + found;
            match parse_tag(&text[start..]) {
                Ok((rest, tag)) => {
                    let end = text.len() - rest.len();
                    out.push(TagSpan {
                        tag,
                        range: start..end,
                    });
                    offset = end;
                }
                Err(_) => offset = start + 1,
            }
        }
        out
    }

    /// Tags in order of appearance; duplicates are kept.
    pub fn extract_tags(text: &str) -> Vec<Tag> {
        scan_tags(text).into_iter().map(|span| span.tag).collect()
    }

    /// Delete every `@name` / `@name(value)` for `name`. Text without such a
    /// tag comes back untouched.
    pub fn remove_tag(text: &str, name: &str) -> String {
        let spans: Vec<TagSpan> = scan_tags(text)
            .into_iter()
            .filter(|span| span.tag.name == name)
            .collect();
        if spans.is_empty() {
            return text.to_string();
        }
        tidy(&cut_spans(text, &spans))
    }

    /// Strip all tag markup, for display.
    pub fn remove_all_tag_markup(text: &str) -> String {
        tidy(&cut_spans(text, &scan_tags(text)))
    }

    /// Insert `tag` into `text` at `position`.
    ///
    /// Any tag with the same name is removed first. If the exact tag (name and
    /// value) is already present the result is the text with it removed, so
    /// inserting the same tag twice is a toggle.
    pub fn insert_tag(text: &str, kind: ItemType, tag: &Tag, position: TagPosition) -> String {
        if extract_tags(text).contains(tag) {
            return remove_tag(text, &tag.name);
        }
        let text = remove_tag(text, &tag.name);
        let marker = tag.to_string();
        match position {
            TagPosition::Beginning => {
                let at = prefix_len(kind, &text);
                let mut out = text;
                out.insert_str(at, &format!("{marker} "));
                out
            }
            TagPosition::End => append(text, &marker),
            TagPosition::At(offset) => insert_at(text, offset, &marker),
            TagPosition::After(offset) => match next_boundary(&text, offset) {
                Some(next) => insert_at(text, next, &marker),
                None => append(text, &marker),
            },
        }
    }

    fn prefix_len(kind: ItemType, text: &str) -> usize {
        match kind {
            ItemType::Task if text.starts_with(ItemType::TASK_PREFIX) => ItemType::TASK_PREFIX.len(),
            _ => 0,
        }
    }

    fn append(mut text: String, marker: &str) -> String {
        if !text.is_empty() && !text.ends_with(char::is_whitespace) {
            text.push(' ');
        }
        text.push_str(marker);
        text
    }

    fn insert_at(text: String, offset: usize, marker: &str) -> String {
        if offset > text.len() || !text.is_char_boundary(offset) {
            return append(text, marker);
        }
        let before = text[..offset].chars().next_back();
        let after = text[offset..].chars().next();

        let mut snippet = String::with_capacity(marker.len() + 2);
        if matches!(before, Some(c) if !c.is_whitespace()) {
            snippet.push(' ');
        }
        snippet.push_str(marker);
        if matches!(after, Some(c) if !c.is_whitespace()) {
            snippet.push(' ');
        }

        let mut out = text;
        out.insert_str(offset, &snippet);
        out
    }

    /// Offset of the character following the one at `offset`, if there is one.
    fn next_boundary(text: &str, offset: usize) -> Option<usize> {
        if offset >= text.len() || !text.is_char_boundary(offset) {
            return None;
        }
        text[offset..].chars().next().map(|c| offset + c.len_utf8())
    }

    fn cut_spans(text: &str, spans: &[TagSpan]) -> String {
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in spans {
            out.push_str(&text[cursor..span.range.start]);
            cursor = span.range.end;
        }
        out.push_str(&text[cursor..]);
        out
    }

    /// Collapse space runs left behind by a removal and trim the ends.
    fn tidy(text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut prev_space = false;
        for ch in text.chars() {
            if ch == ' ' {
                if !prev_space {
                    out.push(ch);
                }
                prev_space = true;
            } else {
                out.push(ch);
                prev_space = false;
            }
        }
        out.trim().to_string()
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use pretty_assertions::assert_eq;
        use rstest::rstest;

        fn tag(name: &str) -> Tag {
            Tag::new(name)
        }

        fn valued(name: &str, value: &str) -> Tag {
            Tag::with_value(name, value)
        }

        #[rstest]
        #[case("- Task with simple tag @next", vec![tag("next")])]
        #[case("- Task with value tag @done(2025-06-23)", vec![valued("done", "2025-06-23")])]
        #[case(
            "- Multiple tags @next @urgent @due(today)",
            vec![tag("next"), tag("urgent"), valued("due", "today")]
        )]
        #[case(
            "- Complex value @project(SwiftUI App Development)",
            vec![valued("project", "SwiftUI App Development")]
        )]
        #[case("- Task with BUG tag @BUG", vec![tag("BUG")])]
        #[case("- No tags here", vec![])]
        #[case("- dup @a @a", vec![tag("a"), tag("a")])]
        #[case("- empty value @due() stays", vec![tag("due")])]
        #[case("- unclosed @due(soon", vec![tag("due")])]
        #[case("- lone @ sign", vec![])]
        fn extracts_tags_in_order(#[case] text: &str, #[case] expected: Vec<Tag>) {
            assert_eq!(extract_tags(text), expected);
        }

        #[test]
        fn spans_cover_markup() {
            let text = "x @a(1) y @b";
            let spans = scan_tags(text);
            assert_eq!(&text[spans[0].range.clone()], "@a(1)");
            assert_eq!(&text[spans[1].range.clone()], "@b");
        }

        #[rstest]
        #[case("- Task @done", "- Task")]
        #[case("- Task @done(2025-06-23)", "- Task")]
        #[case("- Task @next @done @urgent", "- Task @next @urgent")]
        #[case("- Task @done(today) @other", "- Task @other")]
        #[case("- Multiple @done tags @done(2025-01-01)", "- Multiple tags")]
        #[case("- No done tags @next @urgent", "- No done tags @next @urgent")]
        #[case("- Longer name @doneish", "- Longer name @doneish")]
        fn removes_named_tag(#[case] input: &str, #[case] expected: &str) {
            assert_eq!(remove_tag(input, "done"), expected);
        }

        #[test]
        fn remove_is_idempotent_and_noop_without_match() {
            let once = remove_tag("- a  b @x", "x");
            assert_eq!(remove_tag(&once, "x"), once);
            assert_eq!(remove_tag("- keeps  spacing", "x"), "- keeps  spacing");
        }

        #[test]
        fn strip_all_markup_collapses_gaps() {
            assert_eq!(remove_all_tag_markup("a @x b @y(1) c"), "a b c");
            assert_eq!(remove_all_tag_markup("@x lead"), "lead");
        }

        #[test]
        fn insert_at_offset_pads_as_needed() {
            let out = insert_tag("- Buy groceries", ItemType::Task, &tag("urgent"), TagPosition::At(5));
            assert_eq!(out, "- Buy @urgent groceries");

            let text = "- Buy groceries @next";
            let at = text.find("@next").unwrap();
            let out = insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::At(at));
            assert_eq!(out, "- Buy groceries @urgent @next");
        }

        #[test]
        fn insert_after_offset() {
            let out = insert_tag("- Buy groceries", ItemType::Task, &tag("urgent"), TagPosition::After(4));
            assert_eq!(out, "- Buy @urgent groceries");

            let text = "- Buy buy groceries";
            let end_of_first = text.find("buy").unwrap() + "buy".len();
            let out = insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::After(end_of_first));
            assert_eq!(out, "- Buy buy @urgent groceries");

            let text = "- Buy buy groceries";
            let end_of_cap = text.find("Buy").unwrap() + "Buy".len();
            let out = insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::After(end_of_cap));
            assert_eq!(out, "- Buy @urgent buy groceries");
        }

        #[test]
        fn out_of_range_offsets_fall_back_to_end() {
            let text = "- Buy groceries";
            let past = text.len() + 4;
            assert_eq!(
                insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::At(past)),
                "- Buy groceries @urgent"
            );
            assert_eq!(
                insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::After(text.len())),
                "- Buy groceries @urgent"
            );
            assert_eq!(
                insert_tag(text, ItemType::Task, &tag("urgent"), TagPosition::End),
                "- Buy groceries @urgent"
            );
        }

        #[test]
        fn beginning_goes_after_task_prefix() {
            let text = "- review review document";
            let second = text.rfind("review").unwrap() + "review".len();
            let out = insert_tag(text, ItemType::Task, &tag("today"), TagPosition::After(second));
            assert_eq!(out, "- review review @today document");
            let out = insert_tag(&out, ItemType::Task, &tag("urgent"), TagPosition::Beginning);
            assert_eq!(out, "- @urgent review review @today document");

            let out = insert_tag("Errands:", ItemType::Project, &tag("home"), TagPosition::Beginning);
            assert_eq!(out, "@home Errands:");
        }

        #[test]
        fn same_name_is_replaced() {
            let out = insert_tag("- Ship @due(monday)", ItemType::Task, &valued("due", "friday"), TagPosition::End);
            assert_eq!(out, "- Ship @due(friday)");
        }

        #[test]
        fn inserting_twice_toggles() {
            let original = "- Ship it @next";
            let once = insert_tag(original, ItemType::Task, &tag("urgent"), TagPosition::End);
            assert_eq!(extract_tags(&once), vec![tag("next"), tag("urgent")]);
            let twice = insert_tag(&once, ItemType::Task, &tag("urgent"), TagPosition::End);
            assert_eq!(extract_tags(&twice), extract_tags(original));
        }

        #[test]
        fn multibyte_offsets_do_not_split_chars() {
            let text = "- café run";
            let inside = text.find('é').unwrap() + 1;
            assert_eq!(
                insert_tag(text, ItemType::Task, &tag("x"), TagPosition::At(inside)),
                "- café run @x"
            );
            let at_e = text.find('é').unwrap();
            assert_eq!(
                insert_tag(text, ItemType::Task, &tag("x"), TagPosition::After(at_e)),
                "- café @x run"
            );
        }
    }
}

pub mod parser {
    //! Line classifier and parser.
    //!
    //! Every non-blank line becomes one item: leading tabs give the indent
    //! level, the trimmed remainder is the raw text, and the shape of that text
    //! picks the type. Parsing never fails and does not repair indentation.

    use crate::core::{Item, ItemType};
    use nom::{IResult, bytes::complete::take_while};

    type PResult<'a, T> = IResult<&'a str, T>;

    fn leading_tabs(i: &str) -> PResult<'_, &str> {
        take_while(|c: char| c == '\t')(i)
    }

    pub fn count_leading_tabs(line: &str) -> usize {
        leading_tabs(line).map(|(_, tabs)| tabs.len()).unwrap_or(0)
    }

    /// Parse a single line; `None` for blank lines.
    pub fn parse_line(line: &str, line_number: usize) -> Option<Item> {
        let raw = line.trim();
        if raw.is_empty() {
            return None;
        }
        let mut item = Item::new(ItemType::classify(raw), raw, count_leading_tabs(line));
        item.line_number = Some(line_number);
        Some(item)
    }

    /// Parse TaskPaper text into items. Blank lines are dropped.
    pub fn parse_taskpaper_from_str(input: &str) -> Vec<Item> {
        let items: Vec<Item> = input
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| parse_line(line, idx + 1))
            .collect();
        tracing::debug!(items = items.len(), "parsed taskpaper text");
        items
    }

}

pub mod format {
    use crate::core::Item;
    use crate::document::TaskPaperDocument;

    /// Serialize items back to TaskPaper text. Inverse of parsing, minus the
    /// blank lines the parser dropped.
    pub fn format_items(items: &[Item]) -> String {
        items.iter().map(Item::line).collect::<Vec<_>>().join("\n")
    }

    pub fn format_document(doc: &TaskPaperDocument) -> String {
        format_items(doc.items())
    }

}

pub mod document {
    //! The document aggregate and its hierarchy engine.
    //!
    //! The sequence is a pre-order flattening of a forest: an item's children
    //! are the maximal run of following items that are strictly deeper. Blocks
    //! (an item plus that run) are recomputed from indent levels on every call.
    //! Items are addressed by `ItemId`; indices are looked up fresh each time.

    use crate::core::*;
    use crate::format::format_items;
    use crate::parser::parse_taskpaper_from_str;
    use chrono::{Local, NaiveDate};
    use indexmap::IndexSet;

    #[derive(Debug, Clone)]
    pub struct TaskPaperDocument {
        pub file_name: String,
        items: Vec<Item>,
        settings: Settings,
    }

    impl TaskPaperDocument {
        pub fn new(content: &str, file_name: impl Into<String>) -> Self {
            Self::with_settings(content, file_name, Settings::default())
        }

        pub fn with_settings(content: &str, file_name: impl Into<String>, settings: Settings) -> Self {
            Self {
                file_name: file_name.into(),
                items: parse_taskpaper_from_str(content),
                settings,
            }
        }

        pub fn items(&self) -> &[Item] {
            &self.items
        }

        pub fn len(&self) -> usize {
            self.items.len()
        }

        pub fn is_empty(&self) -> bool {
            self.items.is_empty()
        }

        pub fn settings(&self) -> &Settings {
            &self.settings
        }

        /// Serialized text of the current items.
        pub fn content(&self) -> String {
            format_items(&self.items)
        }

        /// Replace everything with a fresh parse of `content`.
        pub fn set_content(&mut self, content: &str) {
            self.items = parse_taskpaper_from_str(content);
        }

        pub fn index_of(&self, id: ItemId) -> Option<usize> {
            self.items.iter().position(|item| item.id == id)
        }

        pub fn get(&self, id: ItemId) -> Option<&Item> {
            self.items.iter().find(|item| item.id == id)
        }

        fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
            self.items.iter_mut().find(|item| item.id == id)
        }

        pub fn item_at(&self, index: usize) -> Option<&Item> {
            self.items.get(index)
        }

        /* ------------------------------ Blocks ------------------------------ */

        /// First index at or after `from` whose level is `<= level`.
        fn next_at_or_above(&self, from: usize, level: usize) -> Option<usize> {
            self.items
                .iter()
                .enumerate()
                .skip(from)
                .find(|(_, item)| item.indent_level <= level)
                .map(|(idx, _)| idx)
        }

        fn block_at(&self, index: usize) -> IndexRange {
            let level = self.items[index].indent_level;
            let last = self
                .next_at_or_above(index + 1, level)
                .map(|next| next - 1)
                .unwrap_or(self.items.len() - 1);
            IndexRange::inclusive(index, last)
        }

        /// The item plus all of its descendants.
        pub fn block(&self, id: ItemId) -> Option<IndexRange> {
            self.index_of(id).map(|index| self.block_at(index))
        }

        /// Ids of the item's direct children.
        pub fn children(&self, id: ItemId) -> Vec<ItemId> {
            let Some(index) = self.index_of(id) else {
                return vec![];
            };
            let block = self.block_at(index);
            let mut out = Vec::new();
            let mut cursor = index + 1;
            while cursor <= block.last() {
                out.push(self.items[cursor].id);
                cursor = self.block_at(cursor).last() + 1;
            }
            out
        }

        /// Nearest preceding item that is shallower, if any.
        pub fn parent(&self, id: ItemId) -> Option<ItemId> {
            let index = self.index_of(id)?;
            let level = self.items[index].indent_level;
            self.items[..index]
                .iter()
                .rev()
                .find(|item| item.indent_level < level)
                .map(|item| item.id)
        }

        /* --------------------------- Indentation --------------------------- */

        /// Deepen the item and its descendants by one level.
        pub fn indent(&mut self, id: ItemId) {
            let Some(index) = self.index_of(id) else {
                return;
            };
            let block = self.block_at(index);
            for item in &mut self.items[block.as_range()] {
                item.indent_level += 1;
            }
            tracing::debug!(?id, moved = block.len, "indented block");
        }

        /// Raise the item and its descendants by one level. No-op at the root.
        pub fn outdent(&mut self, id: ItemId) {
            let Some(index) = self.index_of(id) else {
                return;
            };
            if self.items[index].indent_level == 0 {
                return;
            }
            let block = self.block_at(index);
            for item in &mut self.items[block.as_range()] {
                item.indent_level = item.indent_level.saturating_sub(1);
            }
            tracing::debug!(?id, moved = block.len, "outdented block");
        }

        /* ----------------------------- Movement ----------------------------- */

        pub fn is_at_top(&self, id: ItemId) -> bool {
            self.index_of(id) == Some(0)
        }

        pub fn is_at_bottom(&self, id: ItemId) -> bool {
            self.move_down_plan(id).is_none()
        }

        /// Plan for lifting the item above the nearest preceding item at the
        /// same or a shallower level.
        ///
        /// The item's block moves when a sibling-or-shallower item follows it;
        /// with nothing after it at its level only the item itself moves. The
        /// first item gets a plan for its whole block that targets index 0.
        pub fn move_up_plan(&self, id: ItemId) -> Option<MoveUpPlan> {
            let index = self.index_of(id)?;
            let level = self.items[index].indent_level;
            let insert_at = self.items[..index]
                .iter()
                .rposition(|item| item.indent_level <= level)
                .unwrap_or(0);
            let moving = if index == 0 {
                self.block_at(index)
            } else {
                self.next_at_or_above(index + 1, level)
                    .map(|first| IndexRange::inclusive(index, first - 1))
                    .unwrap_or(IndexRange::single(index))
            };
            let plan = MoveUpPlan { moving, insert_at };
            tracing::trace!(?plan, "move up plan");
            Some(plan)
        }

        /// Plan for moving the item's block past the next sibling-or-shallower
        /// block. `None` when nothing follows at the item's level.
        pub fn move_down_plan(&self, id: ItemId) -> Option<MoveDownPlan> {
            let index = self.index_of(id)?;
            let level = self.items[index].indent_level;
            let first = self.next_at_or_above(index + 1, level)?;
            let after = self
                .next_at_or_above(first + 1, level)
                .map(|second| second - 1)
                .unwrap_or(self.items.len() - 1);
            let plan = MoveDownPlan {
                moving: IndexRange::inclusive(index, first - 1),
                after,
            };
            tracing::trace!(?plan, "move down plan");
            Some(plan)
        }

        /// Returns whether anything moved.
        pub fn move_up(&mut self, id: ItemId) -> bool {
            let Some(plan) = self.move_up_plan(id) else {
                return false;
            };
            if plan.insert_at >= plan.moving.start {
                return false;
            }
            let block: Vec<Item> = self.items.drain(plan.moving.as_range()).collect();
            self.items.splice(plan.insert_at..plan.insert_at, block);
            tracing::debug!(?id, to = plan.insert_at, "moved block up");
            true
        }

        /// Returns whether anything moved.
        pub fn move_down(&mut self, id: ItemId) -> bool {
            let Some(plan) = self.move_down_plan(id) else {
                return false;
            };
            let block: Vec<Item> = self.items.drain(plan.moving.as_range()).collect();
            let at = plan.after + 1 - plan.moving.len;
            self.items.splice(at..at, block);
            tracing::debug!(?id, to = at, "moved block down");
            true
        }

        /// Move the item's whole block so it sits right before `onto`.
        ///
        /// When `onto` is deeper the block is deepened to match; a shallower
        /// destination leaves levels alone. Dropping onto the item itself is a
        /// no-op, dropping into its own descendants is rejected.
        pub fn move_hierarchy(&mut self, id: ItemId, onto: ItemId) -> Result<(), HierarchyError> {
            let index = self.index_of(id).ok_or(HierarchyError::ItemsNotFound)?;
            let moving = self.block_at(index);
            let dest = self.index_of(onto).ok_or(HierarchyError::NoValidDestination)?;
            if dest == index {
                return Ok(());
            }
            if moving.contains(dest) {
                tracing::warn!(?id, ?onto, "refusing to move a block into itself");
                return Err(HierarchyError::NoValidDestination);
            }

            let gain = self.items[dest]
                .indent_level
                .saturating_sub(self.items[index].indent_level);
            let mut block: Vec<Item> = self.items.drain(moving.as_range()).collect();
            if gain > 0 {
                for item in &mut block {
                    item.indent_level += gain;
                }
            }
            let at = if dest > index { dest - moving.len } else { dest };
            self.items.splice(at..at, block);
            tracing::debug!(?id, ?onto, at, gain, "moved hierarchy");
            Ok(())
        }

        /* ---------------------------- Insertion ---------------------------- */

        /// Insert right after `after`, or at the end when it is not found.
        pub fn insert(&mut self, item: Item, after: ItemId) -> ItemId {
            let id = item.id;
            match self.index_of(after) {
                Some(index) => self.items.insert(index + 1, item),
                None => self.items.push(item),
            }
            tracing::debug!(?id, "inserted item");
            id
        }

        /// Build an item from plain text and insert it after `after`.
        /// Blank text inserts nothing.
        pub fn insert_new(
            &mut self,
            after: ItemId,
            kind: ItemType,
            text: &str,
            indent_level: usize,
        ) -> Option<ItemId> {
            if text.trim().is_empty() {
                return None;
            }
            Some(self.insert(Item::with_markup(kind, text, indent_level), after))
        }

        /// Remove exactly this item. Descendants stay where they are.
        pub fn delete(&mut self, id: ItemId) -> Option<Item> {
            let index = self.index_of(id)?;
            tracing::debug!(?id, "deleted item");
            Some(self.items.remove(index))
        }

        fn inbox_index(&self) -> Option<usize> {
            self.items.iter().position(|item| {
                item.indent_level == 0
                    && item.kind == ItemType::Project
                    && item.display_text().starts_with(&self.settings.inbox_name)
            })
        }

        /// File a new item under the inbox project, creating the project at the
        /// top of the document if there is none. Blank text adds nothing.
        pub fn quick_add(&mut self, text: &str, kind: ItemType) -> Option<ItemId> {
            if text.trim().is_empty() {
                return None;
            }
            let item = Item::with_markup(kind, text, self.settings.quick_add_indent);
            let id = item.id;
            match self.inbox_index() {
                Some(inbox) => {
                    let at = self.items[inbox + 1..]
                        .iter()
                        .position(|item| item.indent_level == 0)
                        .map(|offset| inbox + 1 + offset)
                        .unwrap_or(inbox + 1);
                    self.items.insert(at, item);
                }
                None => {
                    let inbox = Item::with_markup(ItemType::Project, &self.settings.inbox_name, 0);
                    self.items.splice(0..0, [inbox, item]);
                }
            }
            tracing::debug!(?id, "quick added item");
            Some(id)
        }

        /* ------------------------------ Editing ------------------------------ */

        /// Replace an item's raw text. Returns false if the item is gone.
        pub fn set_text(&mut self, id: ItemId, raw_text: &str) -> bool {
            match self.get_mut(id) {
                Some(item) => {
                    item.set_raw_text(raw_text.trim());
                    true
                }
                None => false,
            }
        }

        pub fn add_tag(&mut self, id: ItemId, tag: &Tag, position: TagPosition) {
            if let Some(item) = self.get_mut(id) {
                item.add_tag(tag, position);
            }
        }

        pub fn remove_tag(&mut self, id: ItemId, name: &str) {
            if let Some(item) = self.get_mut(id) {
                item.remove_tag(name);
            }
        }

        /* ----------------------------- Completion ----------------------------- */

        pub fn is_completed(&self, item: &Item) -> bool {
            item.is_completed(&self.settings.done_tag)
        }

        /// Flip completion, stamping today's date when marking done.
        pub fn toggle_task_completion(&mut self, id: ItemId) {
            self.toggle_task_completion_on(id, Local::now().date_naive());
        }

        pub fn toggle_task_completion_on(&mut self, id: ItemId, date: NaiveDate) {
            let Some(completed) = self.get(id).map(|item| self.is_completed(item)) else {
                return;
            };
            self.set_task_completion(id, !completed, date);
        }

        pub fn set_task_completion(&mut self, id: ItemId, completed: bool, date: NaiveDate) {
            let stamp = self.settings.format_date(date);
            let done_tag = self.settings.done_tag.clone();
            if let Some(item) = self.get_mut(id) {
                item.set_completion(&done_tag, completed, &stamp);
                tracing::debug!(?id, completed, "set completion");
            }
        }

        /* ------------------------------ Queries ------------------------------ */

        /// Every distinct tag, sorted by display text.
        pub fn all_tags(&self) -> Vec<Tag> {
            let mut seen = IndexSet::new();
            for item in &self.items {
                for tag in item.tags().iter() {
                    seen.insert(tag.clone());
                }
            }
            let mut tags: Vec<Tag> = seen.into_iter().collect();
            tags.sort_by_cached_key(|tag| tag.to_string());
            tags
        }

        pub fn stats(&self) -> crate::projectors::stats_projector::DocumentStats {
            crate::projectors::stats_projector::project(self)
        }
    }

}

pub mod projectors {
    //! Read models computed on demand from a document.

    pub mod stats_projector {
        use crate::core::ItemType;
        use crate::document::TaskPaperDocument;
        use serde::{Deserialize, Serialize};

        /// Item counts per type. Nothing here is stored; recompute after edits.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct DocumentStats {
            pub projects: usize,
            pub tasks: usize,
            pub completed_tasks: usize,
            pub notes: usize,
        }

        impl DocumentStats {
            pub fn pending_tasks(&self) -> usize {
                self.tasks - self.completed_tasks
            }
        }

        pub fn project(doc: &TaskPaperDocument) -> DocumentStats {
            let mut stats = DocumentStats::default();
            for item in doc.items() {
                match item.kind {
                    ItemType::Project => stats.projects += 1,
                    ItemType::Task => {
                        stats.tasks += 1;
                        if doc.is_completed(item) {
                            stats.completed_tasks += 1;
                        }
                    }
                    ItemType::Note => stats.notes += 1,
                }
            }
            stats
        }

        #[cfg(test)]
        mod tests {
            use super::*;

            #[test]
            fn counts_follow_tag_state() {
                let mut doc = TaskPaperDocument::new(
                    "P:\n\t- a @done\n\t- b\n\tnote\nQ:\n\t- c @done(2025-01-01)",
                    "t",
                );
                let stats = doc.stats();
                assert_eq!(
                    stats,
                    DocumentStats {
                        projects: 2,
                        tasks: 3,
                        completed_tasks: 2,
                        notes: 1
                    }
                );
                assert_eq!(stats.pending_tasks(), 1);

                let b = doc.items()[2].id;
                doc.toggle_task_completion(b);
                assert_eq!(doc.stats().completed_tasks, 3);
            }

            #[test]
            fn done_notes_are_not_completed_tasks() {
                let doc = TaskPaperDocument::new("a finished note @done", "t");
                assert_eq!(doc.stats().completed_tasks, 0);
                assert_eq!(doc.stats().notes, 1);
            }
        }
    }

    pub mod filter_projector {
        use crate::core::{Item, ItemId};
        use crate::document::TaskPaperDocument;

        /// Tag filter plus free-text search, as offered by list views.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct ItemFilter {
            /// Tag name to require; a leading `@` is ignored.
            pub tag: Option<String>,
            /// Keep items *without* the tag instead.
            pub negated: bool,
            /// Case-insensitive substring of the raw text.
            pub search: Option<String>,
        }

        impl ItemFilter {
            pub fn tagged(tag: impl Into<String>) -> Self {
                Self {
                    tag: Some(tag.into()),
                    ..Self::default()
                }
            }

            pub fn matches(&self, item: &Item) -> bool {
                let tag_ok = match self.tag.as_deref().map(|t| t.strip_prefix('@').unwrap_or(t)) {
                    Some(name) if !name.is_empty() => item.has_tag(name) != self.negated,
                    _ => true,
                };
                let search_ok = match self.search.as_deref() {
                    Some(needle) if !needle.is_empty() => item
                        .raw_text()
                        .to_lowercase()
                        .contains(&needle.to_lowercase()),
                    _ => true,
                };
                tag_ok && search_ok
            }
        }

        /// Matching items in document order.
        pub fn project<'a>(doc: &'a TaskPaperDocument, filter: &ItemFilter) -> Vec<&'a Item> {
            doc.items().iter().filter(|item| filter.matches(item)).collect()
        }

        pub fn matching_ids(doc: &TaskPaperDocument, filter: &ItemFilter) -> Vec<ItemId> {
            project(doc, filter).into_iter().map(|item| item.id).collect()
        }

        #[cfg(test)]
        mod tests {
            use super::*;

            fn doc() -> TaskPaperDocument {
                TaskPaperDocument::new(
                    "Work:\n\t- Email Ann @next\n\t- Fix bug @BUG @next\n\t- Lunch\nnote @next",
                    "t",
                )
            }

            fn texts(items: Vec<&Item>) -> Vec<String> {
                items.iter().map(|i| i.display_text()).collect()
            }

            #[test]
            fn filters_by_tag_with_or_without_at() {
                let doc = doc();
                let with_at = project(&doc, &ItemFilter::tagged("@next"));
                let bare = project(&doc, &ItemFilter::tagged("next"));
                assert_eq!(texts(with_at), vec!["Email Ann", "Fix bug", "note"]);
                assert_eq!(texts(bare).len(), 3);
            }

            #[test]
            fn negated_filter_keeps_untagged() {
                let doc = doc();
                let filter = ItemFilter {
                    negated: true,
                    ..ItemFilter::tagged("next")
                };
                assert_eq!(texts(project(&doc, &filter)), vec!["Work", "Lunch"]);
            }

            #[test]
            fn search_is_case_insensitive_and_combines() {
                let doc = doc();
                let filter = ItemFilter {
                    search: Some("BUG".into()),
                    ..ItemFilter::tagged("next")
                };
                assert_eq!(texts(project(&doc, &filter)), vec!["Fix bug"]);
                let all = ItemFilter::default();
                assert_eq!(project(&doc, &all).len(), doc.len());
                assert_eq!(matching_ids(&doc, &filter), vec![doc.items()[2].id]);
            }
        }
    }

    pub mod tag_projector {
        use crate::document::TaskPaperDocument;
        use indexmap::IndexMap;

        /// Usage count per tag display text, in order of first appearance.
        pub fn tag_counts(doc: &TaskPaperDocument) -> IndexMap<String, usize> {
            let mut counts = IndexMap::new();
            for item in doc.items() {
                for tag in item.tags().iter() {
                    *counts.entry(tag.to_string()).or_insert(0) += 1;
                }
            }
            counts
        }

        #[cfg(test)]
        mod tests {
            use super::*;

            #[test]
            fn counts_in_first_seen_order() {
                let doc = TaskPaperDocument::new("- a @next @due(mon)\n- b @next", "t");
                let counts: Vec<(String, usize)> = tag_counts(&doc).into_iter().collect();
                assert_eq!(
                    counts,
                    vec![("@next".to_string(), 2), ("@due(mon)".to_string(), 1)]
                );
            }
        }
    }
}

pub mod storage {
    //! File-backed loading and saving. The core never calls into this; it is
    //! the collaborator the command-line tool uses.

    use crate::core::Settings;
    use crate::document::TaskPaperDocument;
    use anyhow::{Context, Result};
    use std::{fs, path::Path};

    pub trait DocumentStore {
        /// Settings handed to every document this store loads.
        fn settings(&self) -> &Settings;
        fn load(&self, path: &Path) -> Result<TaskPaperDocument>;
        fn save(&self, path: &Path, doc: &TaskPaperDocument) -> Result<()>;
    }

    /// Reads and writes plain `.taskpaper` files.
    #[derive(Debug, Clone, Default)]
    pub struct FsDocumentStore {
        pub settings: Settings,
    }

    impl FsDocumentStore {
        pub fn new(settings: Settings) -> Self {
            Self { settings }
        }
    }

    impl DocumentStore for FsDocumentStore {
        fn settings(&self) -> &Settings {
            &self.settings
        }

        fn load(&self, path: &Path) -> Result<TaskPaperDocument> {
            let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
            let name = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Untitled".to_string());
            tracing::debug!(?path, "loaded document");
            Ok(TaskPaperDocument::with_settings(&text, name, self.settings.clone()))
        }

        fn save(&self, path: &Path, doc: &TaskPaperDocument) -> Result<()> {
            let mut text = doc.content();
            if !text.is_empty() {
                text.push('\n');
            }
            fs::write(path, text.as_bytes()).with_context(|| format!("writing {:?}", path))?;
            tracing::debug!(?path, items = doc.len(), "saved document");
            Ok(())
        }
    }

    /// Load settings from a JSON file and validate them.
    pub fn load_settings(path: &Path) -> Result<Settings> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
        let settings: Settings =
            serde_json::from_str(&text).with_context(|| format!("parsing settings {:?}", path))?;
        settings
            .validate()
            .with_context(|| format!("validating settings {:?}", path))?;
        Ok(settings)
    }

}

pub use document::TaskPaperDocument;
pub use format::{format_document, format_items};
pub use parser::parse_taskpaper_from_str;
