//! Content classifier: eligibility, grade, and media references.
//!
//! Pure functions over the rendered HTML. The heuristics mirror how the cert
//! pages actually render: the cert number in a subtitle element, the grade as
//! either "PSA 9" or a label like "NM-MT 8", and two content images (front
//! first, back second) that start life as base64 placeholders.

use regex::Regex;

use crate::model::{CertId, Classification, Exclusion, Grade, MediaRef, Side};

/// Locale variants that are out of scope for harvesting. These cluster in
/// the identifier space, which is why hitting one breaks the chain.
const EXCLUDED_LOCALES: [&str; 3] = ["japanese", "asia", "chinese"];

/// Extracts eligibility, grade, and media references from fetched content.
pub trait Classify {
    /// Does the rendered page actually show the requested cert?
    fn page_matches(&self, html: &str, id: CertId) -> bool;

    fn classify(&self, html: &str) -> Classification;
}

pub struct RegexClassifier {
    img_tag: Regex,
    src_attr: Regex,
    grade_numeric: Regex,
    grade_label: Regex,
}

impl Default for RegexClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexClassifier {
    pub fn new() -> Self {
        Self {
            img_tag: Regex::new(r#"<img[^>]*itemprop="contentUrl"[^>]*>"#).expect("static regex"),
            src_attr: Regex::new(r#"src="([^"]+)""#).expect("static regex"),
            grade_numeric: Regex::new(r"(?i)\bPSA\s*([0-9]{1,2})\b").expect("static regex"),
            grade_label: Regex::new(
                r"(?i)\b(?:PR|GOOD|VG|VG-EX|EX|EX-MT|NM|NM-MT|MINT|GEM\s*MT)\s*([0-9]{1,2})\b",
            )
            .expect("static regex"),
        }
    }

    fn grade(&self, html: &str) -> Grade {
        for re in [&self.grade_numeric, &self.grade_label] {
            if let Some(caps) = re.captures(html)
                && let Ok(n) = caps[1].parse::<u8>()
                && (1..=10).contains(&n)
            {
                return Grade::known(n);
            }
        }
        Grade::unknown()
    }

    /// First content image is the front, second the back. Placeholder srcs
    /// (anything not http) are dropped rather than harvested.
    fn media_refs(&self, html: &str) -> Vec<MediaRef> {
        self.img_tag
            .find_iter(html)
            .take(2)
            .zip([Side::Front, Side::Back])
            .filter_map(|(tag, side)| {
                let src = self.src_attr.captures(tag.as_str())?;
                let url = src[1].to_string();
                url.starts_with("http").then_some(MediaRef { side, url })
            })
            .collect()
    }
}

impl Classify for RegexClassifier {
    fn page_matches(&self, html: &str, id: CertId) -> bool {
        html.contains(&format!("#{id}"))
    }

    fn classify(&self, html: &str) -> Classification {
        let lower = html.to_lowercase();

        let exclusion = if !lower.contains("pokemon") {
            Some(Exclusion::NonTarget)
        } else if EXCLUDED_LOCALES.iter().any(|k| lower.contains(k)) {
            Some(Exclusion::ExcludedLocale)
        } else {
            None
        };

        Classification {
            exclusion,
            grade: self.grade(html),
            media: self.media_refs(html),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<html><body><p class=\"text-subtitle1\">#12345678</p>{body}</body></html>")
    }

    #[test]
    fn page_identity_check() {
        let c = RegexClassifier::new();
        assert!(c.page_matches(&page(""), CertId(12345678)));
        assert!(!c.page_matches(&page(""), CertId(87654321)));
    }

    #[test]
    fn numeric_grade_wins() {
        let c = RegexClassifier::new();
        let html = page("Pokemon Charizard <dd>PSA 10</dd>");
        assert_eq!(c.classify(&html).grade, Grade::known(10));
    }

    #[test]
    fn label_grade_fallback() {
        let c = RegexClassifier::new();
        let html = page("Pokemon Pikachu <dd>NM-MT 8</dd>");
        assert_eq!(c.classify(&html).grade, Grade::known(8));
        let gem = page("Pokemon Mew <dd>GEM MT 10</dd>");
        assert_eq!(c.classify(&gem).grade, Grade::known(10));
    }

    #[test]
    fn out_of_range_grade_is_unknown() {
        let c = RegexClassifier::new();
        let html = page("Pokemon Eevee PSA 11");
        assert_eq!(c.classify(&html).grade, Grade::unknown());
    }

    #[test]
    fn non_target_and_locale_exclusions() {
        let c = RegexClassifier::new();
        let baseball = page("1952 Topps Mickey Mantle PSA 8");
        assert_eq!(
            c.classify(&baseball).exclusion,
            Some(Exclusion::NonTarget)
        );

        let japanese = page("Pokemon Japanese Base Set PSA 9");
        let got = c.classify(&japanese);
        assert!(!got.eligible());
        assert_eq!(got.exclusion, Some(Exclusion::ExcludedLocale));
    }

    #[test]
    fn eligibility_is_derived_from_exclusion() {
        let c = RegexClassifier::new();
        assert!(c.classify(&page("Pokemon Charizard PSA 9")).eligible());
        assert!(!c.classify(&page("1952 Topps Mickey Mantle PSA 8")).eligible());
    }

    #[test]
    fn media_refs_tagged_front_then_back() {
        let c = RegexClassifier::new();
        let html = page(concat!(
            r#"Pokemon <img itemprop="contentUrl" src="https://img.example/small/f.jpg">"#,
            r#"<img itemprop="contentUrl" src="https://img.example/small/b.jpg">"#,
        ));
        let media = c.classify(&html).media;
        assert_eq!(media.len(), 2);
        assert_eq!(media[0].side, Side::Front);
        assert!(media[0].url.ends_with("/f.jpg"));
        assert_eq!(media[1].side, Side::Back);
    }

    #[test]
    fn placeholder_srcs_are_dropped() {
        let c = RegexClassifier::new();
        let html = page(concat!(
            r#"Pokemon <img itemprop="contentUrl" src="data:image/gif;base64,R0l">"#,
            r#"<img itemprop="contentUrl" src="https://img.example/small/b.jpg">"#,
        ));
        let media = c.classify(&html).media;
        // Side is keyed to slot position, so the surviving image stays back.
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].side, Side::Back);
    }

    #[test]
    fn no_media_on_unrendered_page() {
        let c = RegexClassifier::new();
        assert!(c.classify(&page("Pokemon")).media.is_empty());
    }
}
