// Property tests for the inline marker accumulators
// Author: kelexine (https://github.com/kelexine)

use chatbridge::translation::accumulator::{PatternAccumulator, PatternFamily, Segment};
use chatbridge::translation::citation::CitationMarkers;
use chatbridge::translation::sandbox::SandboxLinks;
use proptest::prelude::*;

/// Feed `pieces` one by one, flush, and return (output, matched markers).
fn drive<F: PatternFamily>(family: F, pieces: &[String]) -> (String, Vec<String>) {
    let mut acc = PatternAccumulator::new(family);
    let mut output = String::new();
    let mut matched = Vec::new();
    for piece in pieces {
        for segment in acc.feed(piece) {
            match segment {
                Segment::Passthrough(text) => output.push_str(&text),
                Segment::Matched(marker) => {
                    output.push_str(&marker);
                    matched.push(marker);
                }
            }
        }
    }
    if let Some(rest) = acc.flush() {
        output.push_str(&rest);
    }
    (output, matched)
}

fn split_at_chars(text: &str, cuts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (chars.len() + 1)).collect();
    points.push(0);
    points.push(chars.len());
    points.sort_unstable();
    points.dedup();
    points
        .windows(2)
        .map(|w| chars[w[0]..w[1]].iter().collect())
        .collect()
}

fn marker_text() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            Just("【1†source】".to_string()),
            Just("【12†来源】".to_string()),
            Just("【".to_string()),
            Just("(sandbox:/mnt/data/a.csv)".to_string()),
            Just("(sandbox:".to_string()),
            Just("(".to_string()),
            Just(")".to_string()),
            "[a-z \\n]{0,8}",
        ],
        0..12,
    )
    .prop_map(|parts| parts.concat())
}

proptest! {
    #[test]
    fn citation_text_is_conserved(text in marker_text(), cuts in prop::collection::vec(any::<usize>(), 0..6)) {
        let pieces = split_at_chars(&text, &cuts);
        let (output, _) = drive(CitationMarkers, &pieces);
        prop_assert_eq!(output, text);
    }

    #[test]
    fn sandbox_text_is_conserved(text in marker_text(), cuts in prop::collection::vec(any::<usize>(), 0..6)) {
        let pieces = split_at_chars(&text, &cuts);
        let (output, _) = drive(SandboxLinks, &pieces);
        prop_assert_eq!(output, text);
    }

    #[test]
    fn complete_markers_match_regardless_of_split(cuts in prop::collection::vec(any::<usize>(), 0..6)) {
        let text = "see 【3†source】 and (sandbox:/mnt/data/out.csv) done";
        let pieces = split_at_chars(text, &cuts);

        let (_, citations) = drive(CitationMarkers, &pieces);
        prop_assert_eq!(citations, vec!["【3†source】".to_string()]);

        let (_, links) = drive(SandboxLinks, &pieces);
        prop_assert_eq!(links, vec!["(sandbox:/mnt/data/out.csv)".to_string()]);
    }
}
