//! Text equivalence used by voting and consensus.

use std::collections::HashSet;

/// Lower-case, drop code-fence markers, collapse whitespace and trim
/// surrounding punctuation.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase().replace("```", " ");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_string()
}

/// Jaccard similarity over whitespace-separated word sets.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let wa: HashSet<&str> = a.split_whitespace().collect();
    let wb: HashSet<&str> = b.split_whitespace().collect();
    if wa.is_empty() && wb.is_empty() {
        return 1.0;
    }
    let intersection = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    intersection / union
}

/// Inputs must already be normalized.
pub fn equivalent(a: &str, b: &str, threshold: f64) -> bool {
    a == b || jaccard(a, b) >= threshold
}

/// Greedy partition of `texts` into equivalence classes.
///
/// Each text joins the first class whose first member it is equivalent to.
/// Classes are returned in order of their first member, and members keep
/// input order, so "earliest" ties resolve to the earliest input.
pub fn partition(texts: &[&str], threshold: f64) -> Vec<Vec<usize>> {
    let normalized: Vec<String> = texts.iter().map(|t| normalize(t)).collect();
    let mut classes: Vec<Vec<usize>> = Vec::new();
    for (i, text) in normalized.iter().enumerate() {
        match classes
            .iter_mut()
            .find(|c| equivalent(&normalized[c[0]], text, threshold))
        {
            Some(class) => class.push(i),
            None => classes.push(vec![i]),
        }
    }
    classes
}

/// Index of the largest class; ties go to the earliest.
pub fn largest(classes: &[Vec<usize>]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, c) in classes.iter().enumerate() {
        if best.map_or(true, |b| c.len() > classes[b].len()) {
            best = Some(i);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  ```yaml\nReplicas:   3\n```  "), "yaml replicas: 3");
        assert_eq!(normalize("Hello, World!"), "hello, world");
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("a b c", "a b c"), 1.0);
        assert_eq!(jaccard("a b", "c d"), 0.0);
        assert!((jaccard("a b c", "a b d") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard("", ""), 1.0);
    }

    #[test]
    fn test_partition_orders_classes_by_first_member() {
        let texts = ["use port 8080", "Use port 8080.", "use port 9090 instead", "USE PORT 8080"];
        let classes = partition(&texts, 0.85);
        assert_eq!(classes, vec![vec![0, 1, 3], vec![2]]);
        assert_eq!(largest(&classes), Some(0));
    }

    #[test]
    fn test_largest_tie_goes_to_earliest() {
        let classes = vec![vec![0], vec![1, 2], vec![3, 4]];
        assert_eq!(largest(&classes), Some(1));
        assert_eq!(largest(&[]), None);
    }
}
