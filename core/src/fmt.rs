//! Argument-line formatting for display and history reconstruction.
//!
//! [`history_header`] produces the `$ <cmd> <args…>` line a connection's
//! history log stores per replayed command; [`quote_token`] is the shared
//! escaping both it and [`crate::job::ExecSpec::display_line`] build on.

/// Quote `token` with C-style escaping if it contains whitespace or a
/// double quote; otherwise return it unchanged.
pub fn quote_token(token: &str) -> String {
    let needs_quoting = token.is_empty()
        || token.chars().any(|c| c.is_whitespace() || c == '"');
    if !needs_quoting {
        return token.to_owned();
    }

    let mut out = String::with_capacity(token.len() + 2);
    out.push('"');
    for c in token.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Format a full command line (`$ command arg1 arg2…`) for a connection's
/// history log.
pub fn history_header(command: &str, args: &[String]) -> String {
    let mut parts = vec![quote_token(command)];
    parts.extend(args.iter().map(|a| quote_token(a)));
    format!("$ {}", parts.join(" "))
}
