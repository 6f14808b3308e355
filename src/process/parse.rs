//! Parsers for process-table tool output

/// `pgrep -x <name>`: one PID per line
pub fn parse_pgrep(output: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// `tasklist /FI "IMAGENAME eq <image>" /FO CSV /NH`
///
/// Rows look like `"mihomo.exe","1234","Console","1","25,312 K"`. When nothing
/// matches, tasklist prints an `INFO:` line instead, which yields no PIDs.
pub fn parse_tasklist_csv(output: &str, image: &str) -> Vec<u32> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_csv_row(line.trim());
            if fields.len() < 2 || !fields[0].eq_ignore_ascii_case(image) {
                return None;
            }
            fields[1].parse().ok()
        })
        .collect()
}

fn split_csv_row(row: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in row.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    if !row.is_empty() {
        fields.push(current);
    }
    fields
}

/// Process state letter from `/proc/<pid>/stat`
///
/// The command name in field 2 is parenthesised and may itself contain
/// spaces or parentheses, so the state is read after the last `)`.
pub fn proc_stat_state(stat: &str) -> Option<char> {
    let rest = &stat[stat.rfind(')')? + 1..];
    rest.trim_start().chars().next()
}

/// Linux truncates `/proc/<pid>/comm` to 15 bytes
pub fn comm_matches(comm: &str, name: &str) -> bool {
    const TASK_COMM_LEN: usize = 15;
    let comm = comm.trim_end_matches('\n');
    if name.len() <= TASK_COMM_LEN {
        comm == name
    } else {
        name.is_char_boundary(TASK_COMM_LEN) && comm == &name[..TASK_COMM_LEN]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgrep() {
        assert_eq!(parse_pgrep("812\n4411\n"), vec![812, 4411]);
        assert!(parse_pgrep("").is_empty());
    }

    #[test]
    fn test_tasklist_rows() {
        let output = "\r\n\"mihomo.exe\",\"6420\",\"Services\",\"0\",\"38,512 K\"\r\n\"MIHOMO.EXE\",\"7000\",\"Console\",\"1\",\"1,024 K\"\r\n";
        assert_eq!(parse_tasklist_csv(output, "mihomo.exe"), vec![6420, 7000]);
    }

    #[test]
    fn test_tasklist_no_match() {
        let output = "INFO: No tasks are running which match the specified criteria.\r\n";
        assert!(parse_tasklist_csv(output, "mihomo.exe").is_empty());
    }

    #[test]
    fn test_csv_keeps_commas_in_quotes() {
        assert_eq!(
            split_csv_row("\"a\",\"1,024 K\""),
            vec!["a".to_string(), "1,024 K".to_string()]
        );
    }

    #[test]
    fn test_stat_state() {
        assert_eq!(proc_stat_state("4411 (mihomo) S 1 4411 4411 0 -1"), Some('S'));
        assert_eq!(proc_stat_state("77 (odd) name)) Z 1 77"), Some('Z'));
        assert_eq!(proc_stat_state("garbage"), None);
    }

    #[test]
    fn test_comm_truncation() {
        assert!(comm_matches("mihomo\n", "mihomo"));
        assert!(!comm_matches("mihomo-alpha\n", "mihomo"));
        assert!(comm_matches("gw-engine-stub-\n", "gw-engine-stub-12345"));
    }
}
