pub const MAX_FEATURE_LABELS: usize = 8;
pub const MAX_FEATURE_LABEL_CHARS: usize = 40;

pub const QUICK_TAGS: &[&str] = &[
    "modern style",
    "warm lighting",
    "add plants",
    "minimalist",
    "golden hour",
    "remove clutter",
    "brighter colors",
    "cozy atmosphere",
];

pub fn parse_feature_labels(text: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for raw in text.split(['\n', ',', ';']) {
        let Some(label) = clean_label(raw) else {
            continue;
        };
        if labels
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(&label))
        {
            continue;
        }
        labels.push(label);
        if labels.len() >= MAX_FEATURE_LABELS {
            break;
        }
    }
    labels
}

fn clean_label(raw: &str) -> Option<String> {
    let mut value = raw.trim();
    value = value.trim_start_matches(['-', '*', '•', '·']).trim_start();
    let digits = value.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &value[digits..];
        if let Some(stripped) = rest.strip_prefix(['.', ')', ':']) {
            value = stripped.trim_start();
        }
    }
    let value = value
        .trim_end_matches(['.', '!', ':'])
        .trim_matches(['"', '\'', '`', '*'])
        .trim_end_matches(['.', '!', ':'])
        .trim();
    if value.is_empty() || value.chars().count() > MAX_FEATURE_LABEL_CHARS {
        return None;
    }
    Some(value.to_string())
}

pub fn append_to_prompt(prompt: &str, addition: &str) -> String {
    let addition = addition.trim();
    let base = prompt.trim_end();
    if addition.is_empty() {
        return prompt.to_string();
    }
    if base.is_empty() {
        return addition.to_string();
    }
    if base
        .to_ascii_lowercase()
        .contains(&addition.to_ascii_lowercase())
    {
        return prompt.to_string();
    }
    let separator = if base.ends_with([',', '.', ';']) {
        " "
    } else {
        ", "
    };
    format!("{base}{separator}{addition}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bullets_numbering_and_commas() {
        let reply = "1. Wooden deck\n2) Pool area\n- large windows, stone path\n* \"Garden beds\".";
        assert_eq!(
            parse_feature_labels(reply),
            vec![
                "Wooden deck",
                "Pool area",
                "large windows",
                "stone path",
                "Garden beds"
            ]
        );
    }

    #[test]
    fn drops_duplicates_empties_and_long_labels() {
        let reply = format!(
            "Sofa\n\nsofa\n   \n{}\nLamp",
            "an extremely long sentence that is clearly not a short feature label"
        );
        assert_eq!(parse_feature_labels(&reply), vec!["Sofa", "Lamp"]);
    }

    #[test]
    fn caps_label_count() {
        let reply = (0..20)
            .map(|idx| format!("feature {idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let labels = parse_feature_labels(&reply);
        assert_eq!(labels.len(), MAX_FEATURE_LABELS);
        assert_eq!(labels[0], "feature 0");
    }

    #[test]
    fn append_handles_separators_and_repeats() {
        assert_eq!(append_to_prompt("", "add a pool"), "add a pool");
        assert_eq!(
            append_to_prompt("add a pool", "warm lighting"),
            "add a pool, warm lighting"
        );
        assert_eq!(
            append_to_prompt("add a pool.", "warm lighting"),
            "add a pool. warm lighting"
        );
        assert_eq!(
            append_to_prompt("add a pool, Warm Lighting", "warm lighting"),
            "add a pool, Warm Lighting"
        );
        assert_eq!(append_to_prompt("keep", "  "), "keep");
    }
}
