use std::io::{self, Read};

/// Replaces a `-` argument with the whitespace separated words of `input`.
/// `input` is read at most once, so a second `-` expands to nothing.
pub fn expand_dash(
    args: Vec<String>,
    mut input: impl Read,
) -> io::Result<Vec<String>> {
    if !args.iter().any(|a| a == "-") {
        return Ok(args);
    }
    let mut text = String::new();
    input.read_to_string(&mut text)?;
    let mut words = text.split_whitespace().map(str::to_string);
    let mut expanded = Vec::with_capacity(args.len());
    for arg in args {
        if arg == "-" {
            expanded.extend(words.by_ref());
        } else {
            expanded.push(arg);
        }
    }
    Ok(expanded)
}
