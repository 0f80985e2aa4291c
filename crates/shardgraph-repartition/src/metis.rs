//! External partitioner integration.
//!
//! The graph is written in the METIS adjacency format: a header line
//! `<vertices> <edges>`, then one line per vertex listing its neighbours.
//! Vertices are numbered `1..=n` in ascending user-id order. The tool is run
//! as `<executable> <graph-file> <k>` and must write one partition index per
//! line to `<graph-file>.part.<k>`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

use shardgraph_types::{Assignment, FriendshipMap, PartitionId, UserId};
use tracing::{debug, warn};

use crate::error::{ExternalToolFailure, RepartitionError};
use crate::plan::LogicalPlan;
use crate::projection::LogicalProjection;

/// Computes a `k`-way partition of a friendship graph.
///
/// Returns a zero-based partition index for every user in `users`.
pub trait ExternalPartitioner {
    fn partition(
        &self,
        users: &[UserId],
        friendships: &FriendshipMap,
        k: usize,
    ) -> Result<BTreeMap<UserId, usize>, ExternalToolFailure>;
}

impl<T: ExternalPartitioner + ?Sized> ExternalPartitioner for &T {
    fn partition(
        &self,
        users: &[UserId],
        friendships: &FriendshipMap,
        k: usize,
    ) -> Result<BTreeMap<UserId, usize>, ExternalToolFailure> {
        (**self).partition(users, friendships, k)
    }
}

// ============================================================================
// Graph file format
// ============================================================================

/// Renders the adjacency file for `users` (which must be sorted).
///
/// Friends outside `users` are ignored.
pub fn render_graph(users: &[UserId], friendships: &FriendshipMap) -> String {
    let index: BTreeMap<UserId, usize> = users
        .iter()
        .enumerate()
        .map(|(i, u)| (*u, i + 1))
        .collect();

    let mut lines = Vec::with_capacity(users.len());
    let mut degree_sum = 0;
    for user in users {
        let mut neighbours: Vec<usize> = friendships
            .get(user)
            .into_iter()
            .flatten()
            .filter_map(|f| index.get(f).copied())
            .collect();
        neighbours.sort_unstable();
        degree_sum += neighbours.len();
        lines.push(
            neighbours
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        );
    }

    let mut out = format!("{} {}\n", users.len(), degree_sum / 2);
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Parses a partition file with one index per line.
pub fn parse_partition_file(
    contents: &str,
    vertices: usize,
    k: usize,
) -> Result<Vec<usize>, ExternalToolFailure> {
    let mut parts = Vec::with_capacity(vertices);
    for (i, raw) in contents.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() && line > vertices {
            continue;
        }
        let index: usize = trimmed
            .parse()
            .map_err(|_| ExternalToolFailure::Malformed {
                line,
                content: raw.to_owned(),
            })?;
        if index >= k {
            return Err(ExternalToolFailure::PartitionOutOfRange {
                line,
                index,
                partitions: k,
            });
        }
        parts.push(index);
    }
    if parts.len() != vertices {
        return Err(ExternalToolFailure::WrongLineCount {
            expected: vertices,
            actual: parts.len(),
        });
    }
    Ok(parts)
}

// ============================================================================
// Subprocess partitioner
// ============================================================================

/// Runs a METIS-compatible executable as a blocking subprocess.
#[derive(Debug, Clone)]
pub struct MetisPartitioner {
    executable: PathBuf,
    temp_dir: PathBuf,
}

impl MetisPartitioner {
    pub fn new(executable: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Graph file path unique to this call.
    fn graph_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        self.temp_dir
            .join(format!("shardgraph-{}-{nanos}.graph", std::process::id()))
    }

    fn run(
        &self,
        graph: &Path,
        output: &Path,
        k: usize,
        vertices: usize,
    ) -> Result<Vec<usize>, ExternalToolFailure> {
        let result = Command::new(&self.executable)
            .arg(graph)
            .arg(k.to_string())
            .output()
            .map_err(|source| ExternalToolFailure::Spawn {
                executable: self.executable.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ExternalToolFailure::NonZeroExit {
                executable: self.executable.clone(),
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_owned(),
            });
        }
        if !output.exists() {
            return Err(ExternalToolFailure::MissingOutput(output.to_path_buf()));
        }
        let contents = fs::read_to_string(output).map_err(|source| ExternalToolFailure::Io {
            path: output.to_path_buf(),
            source,
        })?;
        parse_partition_file(&contents, vertices, k)
    }
}

impl ExternalPartitioner for MetisPartitioner {
    fn partition(
        &self,
        users: &[UserId],
        friendships: &FriendshipMap,
        k: usize,
    ) -> Result<BTreeMap<UserId, usize>, ExternalToolFailure> {
        let graph = self.graph_path();
        let mut output = graph.clone().into_os_string();
        output.push(format!(".part.{k}"));
        let output = PathBuf::from(output);

        fs::write(&graph, render_graph(users, friendships)).map_err(|source| {
            ExternalToolFailure::Io {
                path: graph.clone(),
                source,
            }
        })?;
        debug!(graph = %graph.display(), vertices = users.len(), k, "running external partitioner");

        let result = self.run(&graph, &output, k, users.len());

        for path in [&graph, &output] {
            if let Err(err) = fs::remove_file(path)
                && path.exists()
            {
                warn!(path = %path.display(), %err, "failed to remove partitioner temp file");
            }
        }

        let parts = result?;
        Ok(users.iter().copied().zip(parts).collect())
    }
}

// ============================================================================
// Repartitioner
// ============================================================================

/// Turns an external partitioner's output into a logical plan.
#[derive(Debug, Clone)]
pub struct MetisRepartitioner<P> {
    partitioner: P,
}

impl<P: ExternalPartitioner> MetisRepartitioner<P> {
    pub fn new(partitioner: P) -> Self {
        Self { partitioner }
    }

    /// Partitions the projection into as many parts as it has partitions.
    ///
    /// Index `i` maps to the `i`-th partition id in ascending order. A
    /// failure of the tool yields an error and no plan.
    pub fn plan(&self, projection: &LogicalProjection) -> Result<LogicalPlan, RepartitionError> {
        let partitions: Vec<PartitionId> = projection.partitions().collect();
        if partitions.is_empty() {
            return Err(RepartitionError::NoPartitions);
        }
        let users: Vec<UserId> = projection.users().collect();
        if users.is_empty() {
            return Ok(LogicalPlan::unchanged(projection));
        }

        let parts = self
            .partitioner
            .partition(&users, projection.friendships(), partitions.len())
            .inspect_err(|err| warn!(%err, "external partitioner failed"))?;

        let mut target = Assignment::new();
        for (user, index) in parts {
            let pid = partitions.get(index).copied().ok_or(
                ExternalToolFailure::PartitionOutOfRange {
                    line: users.binary_search(&user).map_or(0, |i| i + 1),
                    index,
                    partitions: partitions.len(),
                },
            )?;
            target.insert(user, pid);
        }
        Ok(LogicalPlan::from_assignment(
            projection.assignment().clone(),
            target,
        ))
    }
}
