/// `singular` for a count of one, otherwise `plural` or `singular` + "s".
pub fn pluralize(count: usize, singular: &str, plural: Option<&str>) -> String {
    if count == 1 {
        return singular.to_string();
    }

    match plural {
        Some(p) => p.to_string(),
        None => format!("{singular}s"),
    }
}

/// "1 subscription", "3 apps".
pub fn count_label(count: usize, singular: &str, plural: Option<&str>) -> String {
    format!("{count} {}", pluralize(count, singular, plural))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralizes_counts() {
        assert_eq!(count_label(1, "directory", Some("directories")), "1 directory");
        assert_eq!(count_label(0, "directory", Some("directories")), "0 directories");
        assert_eq!(count_label(3, "app", None), "3 apps");
    }
}
