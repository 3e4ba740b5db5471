//! Parsers for the platform process listings

use super::ProcessInfo;
use std::collections::{HashMap, HashSet, VecDeque};

/// Parse `ps -A -o pid=,ppid=,args=` output.
///
/// Columns are whitespace-padded; everything after the parent pid is the
/// command line with its internal spacing preserved. Unparseable lines are
/// skipped.
#[must_use]
pub fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    output.lines().filter_map(parse_ps_line).collect()
}

fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let (pid, rest) = next_field(line)?;
    let (ppid, rest) = next_field(rest)?;
    Some(ProcessInfo {
        pid: pid.parse().ok()?,
        parent_pid: ppid.parse().ok()?,
        command: rest.trim().to_string(),
        name: None,
        session_id: None,
    })
}

fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], &s[end..])),
        None => Some((s, "")),
    }
}

/// Parse `wmic process get CommandLine,Name,ParentProcessId,ProcessId,SessionId /format:csv`.
///
/// Row layout is `Node,CommandLine,Name,ParentProcessId,ProcessId,SessionId`.
/// The command line may itself contain commas, so the four trailing fields
/// are read from the right and whatever sits between the node and the name
/// is the command line.
#[must_use]
pub fn parse_wmic_csv(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .skip(1)
        .filter_map(parse_wmic_row)
        .collect()
}

fn parse_wmic_row(line: &str) -> Option<ProcessInfo> {
    let fields: Vec<&str> = line.split(',').collect();
    let n = fields.len();
    if n < 6 {
        return None;
    }
    let session_id = fields[n - 1].trim().parse().ok();
    let pid = fields[n - 2].trim().parse().ok()?;
    let parent_pid = fields[n - 3].trim().parse().ok()?;
    let name = fields[n - 4].trim();
    let command = fields[1..n - 4].join(",");

    Some(ProcessInfo {
        pid,
        parent_pid,
        command: command.trim().to_string(),
        name: (!name.is_empty()).then(|| name.to_string()),
        session_id,
    })
}

/// All processes whose parent chain reaches `root`, breadth-first.
///
/// Parents always come before their children, so iterating the result in
/// reverse visits the deepest processes first. `root` itself is excluded.
#[must_use]
pub fn descendants_of(processes: &[ProcessInfo], root: u32) -> Vec<ProcessInfo> {
    let mut children: HashMap<u32, Vec<&ProcessInfo>> = HashMap::new();
    for process in processes {
        // pid 0 parents itself on some platforms
        if process.pid != process.parent_pid {
            children.entry(process.parent_pid).or_default().push(process);
        }
    }

    let mut result = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(parent) = queue.pop_front() {
        for child in children.get(&parent).into_iter().flatten() {
            if !seen.insert(child.pid) {
                continue;
            }
            queue.push_back(child.pid);
            result.push((*child).clone());
        }
    }
    result
}
