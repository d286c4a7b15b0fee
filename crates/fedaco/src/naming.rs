//! Naming conventions for default table and key names.

use heck::ToSnakeCase;

/// `UserProfile` -> `user_profile`
pub fn snake(name: &str) -> String {
    name.to_snake_case()
}

/// Naive English plural of the last word: `category` -> `categories`, `box` -> `boxes`.
pub fn plural(word: &str) -> String {
    let lower = word.to_ascii_lowercase();
    if lower.ends_with('y')
        && !["ay", "ey", "iy", "oy", "uy"].iter().any(|s| lower.ends_with(s))
    {
        format!("{}ies", &word[..word.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}

/// Default table for an entity name: `UserProfile` -> `user_profiles`.
pub fn table_name(entity: &str) -> String {
    plural(&snake(entity))
}

/// Default foreign key referencing an entity: `User` -> `user_id`.
pub fn foreign_key(entity: &str, primary_key: &str) -> String {
    format!("{}_{primary_key}", snake(entity))
}

/// Default pivot table for two entities: alphabetical snake names joined by `_`.
pub fn pivot_table(a: &str, b: &str) -> String {
    let mut names = [snake(a), snake(b)];
    names.sort();
    names.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables() {
        assert_eq!(table_name("User"), "users");
        assert_eq!(table_name("UserProfile"), "user_profiles");
        assert_eq!(table_name("Category"), "categories");
        assert_eq!(table_name("Address"), "addresses");
        assert_eq!(table_name("Day"), "days");
    }

    #[test]
    fn keys() {
        assert_eq!(foreign_key("BlogPost", "id"), "blog_post_id");
        assert_eq!(pivot_table("User", "Role"), "role_user");
    }
}
