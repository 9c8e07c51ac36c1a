//! Line-based unified diff for failure messages.

const CONTEXT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Op {
    kind: Kind,
    a: usize,
    b: usize,
}

fn edit_script<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
    let (n, m) = (a.len(), b.len());
    // lcs[i][j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if a[i] == b[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        let kind = if i < n && j < m && a[i] == b[j] {
            Kind::Equal
        } else if i < n && (j == m || lcs[i + 1][j] >= lcs[i][j + 1]) {
            Kind::Delete
        } else {
            Kind::Insert
        };
        ops.push(Op { kind, a: i, b: j });
        match kind {
            Kind::Equal => {
                i += 1;
                j += 1;
            }
            Kind::Delete => i += 1,
            Kind::Insert => j += 1,
        }
    }
    ops
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{},0", start),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

fn push_line(out: &mut String, prefix: char, line: &str) {
    out.push(prefix);
    out.push_str(line);
    if !line.ends_with('\n') {
        out.push('\n');
    }
}

/// Unified diff of two sequences of lines, each line keeping its own terminator.
/// Empty when the inputs are equal.
pub fn unified_diff<S: AsRef<str> + PartialEq>(a: &[S], b: &[S], from: &str, to: &str) -> String {
    let ops = edit_script(a, b);
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.kind != Kind::Equal)
        .map(|(i, _)| i)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    // group changes separated by at most 2 * CONTEXT equal lines
    let mut groups: Vec<(usize, usize)> = Vec::new();
    for &c in &changes {
        match groups.last_mut() {
            Some((_, last)) if c - *last <= 2 * CONTEXT + 1 => *last = c,
            _ => groups.push((c, c)),
        }
    }

    let mut out = format!("--- {}\n+++ {}\n", from, to);
    for (first, last) in groups {
        let start = first.saturating_sub(CONTEXT);
        let end = (last + CONTEXT + 1).min(ops.len());
        let hunk = &ops[start..end];
        let a_len = hunk.iter().filter(|op| op.kind != Kind::Insert).count();
        let b_len = hunk.iter().filter(|op| op.kind != Kind::Delete).count();
        out.push_str(&format!(
            "@@ -{} +{} @@\n",
            format_range(hunk[0].a, a_len),
            format_range(hunk[0].b, b_len)
        ));
        for op in hunk {
            match op.kind {
                Kind::Equal => push_line(&mut out, ' ', a[op.a].as_ref()),
                Kind::Delete => push_line(&mut out, '-', a[op.a].as_ref()),
                Kind::Insert => push_line(&mut out, '+', b[op.b].as_ref()),
            }
        }
    }
    out
}

/// Splits text into lines that keep their `\n`.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}
