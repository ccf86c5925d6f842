use regex::Regex;

const MAX_MESSAGE_LEN: usize = 500;

/// Event payloads and user-visible errors must never leak filesystem paths
/// or stack traces; operators get the raw detail through the admin read
/// path instead.
pub fn sanitize_message(raw: &str) -> String {
    let path_re = Regex::new(r"(?:/[\w.@~-]+){2,}").expect("static regex");
    let first_line = raw.lines().next().unwrap_or_default();
    let cleaned = path_re.replace_all(first_line, "<path>").into_owned();

    if cleaned.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN;
        while !cleaned.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &cleaned[..cut])
    } else {
        cleaned
    }
}
