use std::collections::BTreeSet;

/// Case-folds, replaces punctuation with spaces and collapses whitespace.
pub fn normalize(text: &str) -> String {
    text.chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Token-set similarity in [0, 1].
///
/// Both titles are reduced to sets of normalized tokens and rebuilt as the
/// shared tokens followed by each side's remaining ones, so word order,
/// repeated words and source decoration such as "!!" do not lower the score.
/// Tokens present on one side only always count against the match.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let left: BTreeSet<String> = normalize(a).split(' ').filter(|t| !t.is_empty()).map(String::from).collect();
    let right: BTreeSet<String> = normalize(b).split(' ').filter(|t| !t.is_empty()).map(String::from).collect();
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    let common = join(left.intersection(&right));
    let only_left = join(left.difference(&right));
    let only_right = join(right.difference(&left));

    let with_left = concat(&common, &only_left);
    let with_right = concat(&common, &only_right);

    strsim::normalized_levenshtein(&with_left, &with_right)
}

/// Locations are compatible when either is missing or both normalize equal.
pub fn locations_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a.map(normalize), b.map(normalize)) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => a == b,
        _ => true,
    }
}

fn join<'a>(tokens: impl Iterator<Item = &'a String>) -> String {
    tokens.map(String::as_str).collect::<Vec<_>>().join(" ")
}

fn concat(a: &str, b: &str) -> String {
    match (a.is_empty(), b.is_empty()) {
        (true, _) => b.to_string(),
        (_, true) => a.to_string(),
        _ => format!("{} {}", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_case_and_punctuation() {
        assert_eq!(normalize("  Career   Fair!! "), "career fair");
        assert_eq!(normalize("Bedpres: Bekk & Co."), "bedpres bekk co");
        assert_eq!(normalize("Påmelding ÅPNER"), "påmelding åpner");
    }

    #[test]
    fn formatting_differences_score_as_identical() {
        assert_eq!(title_similarity("Career Fair", "career fair!!"), 1.0);
        assert_eq!(title_similarity("Fair, Career", "career fair"), 1.0);
    }

    #[test]
    fn unrelated_titles_score_low() {
        assert!(title_similarity("Career Fair", "Board Game Night") < 0.5);
        assert_eq!(title_similarity("", "Board Game Night"), 0.0);
        assert_eq!(title_similarity("!!", "??"), 0.0);
    }

    #[test]
    fn near_spellings_score_high() {
        assert!(title_similarity("Bedriftspresentasjon Netcompany", "Bedriftspresentasjon: Netcompany AS") >= 0.85);
        assert!(title_similarity("Javazone workshop", "JavaZone workshops") > 0.85);
    }

    #[test]
    fn generic_title_is_not_a_match_for_specific_ones() {
        assert!(title_similarity("Workshop", "Rust workshop") < 0.85);
        assert!(title_similarity("Bedpres", "Bedpres: Netcompany") < 0.85);
        assert!(title_similarity("Quiz", "Quiz night at Escape") < 0.85);
        assert!(title_similarity("Bedpres: Bekk", "Bedpres: Netcompany") < 0.85);
    }

    #[test]
    fn location_compatibility() {
        assert!(locations_compatible(Some("Ole-Johan Dahls hus"), Some("ole johan dahls hus")));
        assert!(locations_compatible(None, Some("Lille Aud")));
        assert!(locations_compatible(Some("  "), Some("Lille Aud")));
        assert!(!locations_compatible(Some("Lille Aud"), Some("Store Aud")));
    }
}
