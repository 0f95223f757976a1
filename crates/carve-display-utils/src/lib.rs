//! Small helpers for rendering iterators and indented blocks when displaying
//! formulas, paths and ARG dumps.

use std::fmt::Display;

/// Join the items of an iterator into a single string using `sep` between
/// consecutive items
///
/// The separator is not appended after the last item.
///
/// # Example
///
/// ```
/// use carve_display_utils::join_iterator;
///
/// let items = vec!["a", "b", "c"];
/// assert_eq!(join_iterator(items.iter(), ", "), "a, b, c");
/// ```
pub fn join_iterator<T: ToString, U: Iterator<Item = T>, S: Into<String>>(
    items: U,
    sep: S,
) -> String {
    items
        .map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep.into().as_str())
}

/// Indent every line of the display representation of `item` by `levels`
/// levels of four spaces
pub fn indent_display<T: Display>(item: &T, levels: usize) -> String {
    let prefix = " ".repeat(4 * levels);
    item.to_string()
        .lines()
        .map(|l| format!("{prefix}{l}"))
        .collect::<Vec<_>>()
        .join("\n")
}
