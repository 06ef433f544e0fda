//! Replacement suggestions attached to diagnostics.

/// Levenshtein edit distance, by characters.
#[must_use]
pub fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// The candidate closest to `target`. Ties go to the earliest candidate.
#[must_use]
pub fn closest<'a, I>(target: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|c| (edit_distance(target, c), c))
        .min_by_key(|(d, _)| *d)
        .map(|(_, c)| c)
}

/// Make a string usable as a resource id: illegal characters become `-` and
/// the result is cut to 64 characters.
#[must_use]
pub fn fhirise_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .take(64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distances() {
        assert_eq!(edit_distance("", ""), 0);
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("pat_sex", "pat_sx"), 1);
        assert_eq!(edit_distance("abc", ""), 3);
    }

    #[test]
    fn closest_candidate() {
        let fields = ["record_id", "pat_sex", "pat_dob"];
        assert_eq!(closest("pat_sx", fields), Some("pat_sex"));
        assert_eq!(closest("x", Vec::<&str>::new()), None);
    }

    #[test]
    fn fhirise() {
        assert_eq!(fhirise_id("p_1"), "p-1");
        assert_eq!(fhirise_id(&"a".repeat(70)).len(), 64);
    }
}
