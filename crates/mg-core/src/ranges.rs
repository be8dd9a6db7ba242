//! Shard-list collapsing for human-readable reports.
//!
//! A fleet report listing hundreds of `host:sh0001`-style targets is
//! unreadable; this utility folds consecutive numeric suffixes into ranges,
//! e.g. `host:sh0001-0003,0008-0009`.

/// Collapse `host:name` target labels by folding runs of consecutive numeric
/// suffixes. Labels without a numeric suffix pass through verbatim. Group
/// order follows first appearance in the input.
pub fn collapse_ranges(items: &[String]) -> Vec<String> {
    struct Group {
        key: String,
        nums: Vec<String>,
    }

    let mut groups: Vec<Group> = Vec::new();
    for item in items {
        let (stem, num) = split_numeric_suffix(item);
        if num.is_empty() {
            groups.push(Group {
                key: item.clone(),
                nums: Vec::new(),
            });
            continue;
        }
        match groups.iter_mut().find(|g| g.key == stem) {
            Some(g) => g.nums.push(num.to_string()),
            None => groups.push(Group {
                key: stem.to_string(),
                nums: vec![num.to_string()],
            }),
        }
    }

    groups
        .into_iter()
        .map(|g| {
            if g.nums.is_empty() {
                g.key
            } else {
                format!("{}{}", g.key, fold_runs(&g.nums))
            }
        })
        .collect()
}

/// Split a label into its stem and trailing digit run.
fn split_numeric_suffix(item: &str) -> (&str, &str) {
    let cut = item
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + item[i..].chars().next().map_or(1, char::len_utf8))
        .unwrap_or(0);
    item.split_at(cut)
}

/// Fold sorted digit strings into `first-last` runs joined by commas.
fn fold_runs(nums: &[String]) -> String {
    let mut sorted: Vec<&String> = nums.iter().collect();
    sorted.sort_by_key(|n| n.parse::<u64>().unwrap_or(u64::MAX));

    let mut parts: Vec<String> = Vec::new();
    let mut run_start = 0;
    for i in 1..=sorted.len() {
        let run_ends = i == sorted.len()
            || sorted[i].parse::<u64>().ok()
                != sorted[i - 1].parse::<u64>().ok().map(|v| v + 1);
        if run_ends {
            if run_start == i - 1 {
                parts.push(sorted[run_start].clone());
            } else {
                parts.push(format!("{}-{}", sorted[run_start], sorted[i - 1]));
            }
            run_start = i;
        }
    }
    parts.join(",")
}

#[cfg(test)]
#[path = "ranges_test.rs"]
mod tests;
