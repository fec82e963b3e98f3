use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// File-name slug: lowercase ASCII, accents stripped, whitespace turned
/// into dashes, anything outside `[a-z0-9_-]` dropped, dash runs collapsed
/// and trimmed.
pub fn slugify(text: &str) -> String {
    let mut raw = String::with_capacity(text.len());
    for c in text.nfd().filter(|c| !is_combining_mark(*c)) {
        for c in c.to_lowercase() {
            match c {
                'a'..='z' | '0'..='9' | '_' | '-' => raw.push(c),
                c if c.is_whitespace() => raw.push('-'),
                _ => {}
            }
        }
    }

    let mut slug = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(c);
    }
    slug.trim_matches('-').to_owned()
}
