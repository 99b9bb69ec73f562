//! Naming conventions shared by the metadata extractor and the derive macro.

/// Default table name for a type: snake_case, then pluralized.
///
/// - `User` -> `users`
/// - `UserLanguage` -> `user_languages`
/// - `Person` -> `people`
pub fn table_name(type_name: &str) -> String {
    pluralize(&to_snake_case(type_name))
}

/// Convert PascalCase to snake_case.
///
/// Acronyms stay together: `HTTPServer` -> `http_server`.
pub fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    let chars: Vec<char> = s.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                let prev = chars[i - 1];
                let next = chars.get(i + 1).copied();
                let should_underscore = prev.is_lowercase()
                    || prev.is_ascii_digit()
                    || (prev.is_uppercase() && next.is_some_and(|n| n.is_lowercase()));
                if should_underscore {
                    result.push('_');
                }
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Simple English pluralization of a snake_case name.
///
/// Only the last word is inflected: `user_category` -> `user_categories`.
pub fn pluralize(name: &str) -> String {
    match name.rsplit_once('_') {
        Some((head, last)) => format!("{head}_{}", pluralize_word(last)),
        None => pluralize_word(name),
    }
}

fn pluralize_word(word: &str) -> String {
    match word {
        "person" => return "people".to_string(),
        "child" => return "children".to_string(),
        "man" => return "men".to_string(),
        "woman" => return "women".to_string(),
        "mouse" => return "mice".to_string(),
        "datum" => return "data".to_string(),
        "index" => return "indices".to_string(),
        "matrix" => return "matrices".to_string(),
        "vertex" => return "vertices".to_string(),
        "analysis" => return "analyses".to_string(),
        "axis" => return "axes".to_string(),
        _ => {}
    }

    if word.is_empty() {
        return word.to_string();
    }

    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh")
    {
        return format!("{word}es");
    }

    if word.ends_with('z') {
        return format!("{word}zes");
    }

    if let Some(stripped) = word.strip_suffix('y') {
        if let Some(prev) = stripped.chars().last() {
            if !"aeiou".contains(prev) {
                return format!("{stripped}ies");
            }
        }
        return format!("{word}s");
    }

    if let Some(stripped) = word.strip_suffix("fe") {
        return format!("{stripped}ves");
    }

    if let Some(stripped) = word.strip_suffix('f') {
        return format!("{stripped}ves");
    }

    if word.ends_with('o') {
        let exceptions = ["photo", "piano", "halo", "memo", "pro", "auto", "video"];
        let consonant_before = word
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| !"aeiou".contains(c));
        if consonant_before && !exceptions.contains(&word) {
            return format!("{word}es");
        }
    }

    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_conversions() {
        assert_eq!(to_snake_case("User"), "user");
        assert_eq!(to_snake_case("UserLanguage"), "user_language");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("OwnerID"), "owner_id");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn table_names_are_pluralized() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("UserLanguage"), "user_languages");
        assert_eq!(table_name("Person"), "people");
        assert_eq!(table_name("Category"), "categories");
        assert_eq!(table_name("Address"), "addresses");
        assert_eq!(table_name("Day"), "days");
        assert_eq!(table_name("Toy"), "toys");
        assert_eq!(table_name("Hero"), "heroes");
    }
}
