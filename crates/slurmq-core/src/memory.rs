//! Memory sizes as sacct reports them.

/// What a requested amount of memory applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    Job,
    /// `n` suffix
    PerNode,
    /// `c` suffix
    PerCpu,
}

/// Parse a Slurm size to megabytes: "4G", "1000M", "4096K", "1.5T", or a
/// bare number of MB.
///
/// Returns None for empty strings or placeholder values.
pub fn parse_memory_mb(s: &str) -> Option<u64> {
    let s = s.trim();
    if s.is_empty() || s == "-" {
        return None;
    }

    let (number, factor) = match s.chars().last()? {
        'T' | 't' => (&s[..s.len() - 1], 1024.0 * 1024.0),
        'G' | 'g' => (&s[..s.len() - 1], 1024.0),
        'M' | 'm' => (&s[..s.len() - 1], 1.0),
        'K' | 'k' => (&s[..s.len() - 1], 1.0 / 1024.0),
        _ => (s, 1.0),
    };

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * factor) as u64)
}

/// Parse sacct's requested memory ("32G", "4000Mc", "8Gn") into MB and scope.
pub fn parse_requested_memory(s: &str) -> Option<(u64, MemoryScope)> {
    let s = s.trim();
    if let Some(size) = s.strip_suffix('c') {
        Some((parse_memory_mb(size)?, MemoryScope::PerCpu))
    } else if let Some(size) = s.strip_suffix('n') {
        Some((parse_memory_mb(size)?, MemoryScope::PerNode))
    } else {
        Some((parse_memory_mb(s)?, MemoryScope::Job))
    }
}

/// Total memory requested by a job, in MB.
pub fn requested_memory_mb(req_mem: &str, n_cpus: u32, nodes: u32) -> Option<u64> {
    let (mb, scope) = parse_requested_memory(req_mem)?;
    let total = match scope {
        MemoryScope::Job => mb,
        MemoryScope::PerNode => mb.saturating_mul(u64::from(nodes.max(1))),
        MemoryScope::PerCpu => mb.saturating_mul(u64::from(n_cpus.max(1))),
    };
    Some(total)
}

/// Format MB for display, switching to GB at 1024.
pub fn format_memory_mb(mb: f64) -> String {
    if mb >= 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{mb:.2} MB")
    }
}
