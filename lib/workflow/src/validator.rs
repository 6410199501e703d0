//! Graph validation and plan building.
//!
//! Checks run in a fixed order and the first failure is returned:
//! 1. the graph has a trigger
//! 2. the graph is acyclic
//! 3. reachability from the triggers (unreachable nodes become warnings)
//! 4. branch and merge arity
//! 5. triggers have no incoming connections
//! 6. node configuration is usable
//!
//! A graph that passes is layered into an [`ExecutionPlan`]. Condition
//! outputs on handles other than `"true"` and `"false"` are reported as
//! warnings.

use crate::connection::{HANDLE_FALSE, HANDLE_TRUE, WorkflowConnection};
use crate::context::INPUT_KEY;
use crate::error::{Direction, ValidationError};
use crate::expression::Expression;
use crate::graph::WorkflowGraph;
use crate::node::{NodeConfig, NodeId, NodeType, TriggerConfig, WorkflowNode};
use crate::plan::{ExecutionPlan, PlanWarning, PlannedNode};
use petgraph::algo::toposort;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Minimum outgoing connections of a branch node.
pub const BRANCH_MIN_OUTGOING: usize = 2;

/// Minimum incoming connections of a merge node.
pub const MERGE_MIN_INCOMING: usize = 2;

/// Validates a graph and builds its execution plan.
///
/// # Errors
///
/// Returns the first [`ValidationError`] found, in check order.
pub fn build_plan(graph: &WorkflowGraph) -> Result<ExecutionPlan, ValidationError> {
    if graph.triggers().next().is_none() {
        return Err(ValidationError::NoTrigger);
    }

    if let Some(nodes) = find_cycle(graph) {
        return Err(ValidationError::CycleDetected { nodes });
    }

    let reachable = reachable_from_triggers(graph);
    let mut warnings: Vec<PlanWarning> = graph
        .nodes()
        .filter(|node| !reachable.contains(&node.id))
        .map(|node| PlanWarning::Unreachable {
            node_id: node.id.clone(),
        })
        .collect();

    let mut by_id: Vec<&WorkflowNode> = graph.nodes().collect();
    by_id.sort_by(|a, b| a.id.cmp(&b.id));

    for node in &by_id {
        check_arity(graph, node)?;
    }
    for node in &by_id {
        check_trigger_incoming(graph, node)?;
    }

    let mut conditions = HashMap::new();
    for node in &by_id {
        if let Some(expression) = check_config(node)? {
            conditions.insert(node.id.clone(), Arc::new(expression));
        }
    }

    for node in &by_id {
        if node.node_type() == NodeType::Condition && reachable.contains(&node.id) {
            warnings.extend(unroutable_handles(graph, node));
        }
    }

    let levels = assign_levels(graph, &reachable)?;

    let mut planned = HashMap::new();
    let mut grouped: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
    for (node_id, level) in levels {
        let Some(node) = graph.node(&node_id) else {
            continue;
        };
        let restrict = |connections: Vec<&WorkflowConnection>| -> Vec<WorkflowConnection> {
            connections
                .into_iter()
                .filter(|conn| reachable.contains(&conn.source) && reachable.contains(&conn.target))
                .cloned()
                .collect()
        };
        planned.insert(
            node_id.clone(),
            PlannedNode {
                node: node.clone(),
                level,
                incoming: restrict(graph.incoming(&node_id)),
                outgoing: restrict(graph.outgoing(&node_id)),
                condition: conditions.remove(&node_id),
            },
        );
        grouped.entry(level).or_default().push(node_id);
    }

    let levels = grouped
        .into_values()
        .map(|mut ids| {
            ids.sort();
            ids
        })
        .collect();

    Ok(ExecutionPlan::new(levels, planned, warnings))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Depth-first search with an explicit recursion stack. Returns the nodes
/// of the first cycle found, starting at the node the back-edge points to.
fn find_cycle(graph: &WorkflowGraph) -> Option<Vec<NodeId>> {
    let targets = |node_id: &NodeId| -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = graph
            .outgoing(node_id)
            .into_iter()
            .map(|conn| conn.target.clone())
            .collect();
        ids.sort();
        ids.dedup();
        // Popped from the back, so visit in ascending order.
        ids.reverse();
        ids
    };

    let mut roots: Vec<&NodeId> = graph.nodes().map(|node| &node.id).collect();
    roots.sort();

    let mut marks: HashMap<NodeId, Mark> = HashMap::new();
    for root in roots {
        if marks.contains_key(root) {
            continue;
        }
        marks.insert(root.clone(), Mark::OnStack);
        let mut stack: Vec<(NodeId, Vec<NodeId>)> = vec![(root.clone(), targets(root))];

        while let Some((_, pending)) = stack.last_mut() {
            if let Some(next) = pending.pop() {
                match marks.get(&next).copied() {
                    Some(Mark::OnStack) => {
                        let start = stack.iter().position(|(id, _)| *id == next)?;
                        return Some(stack[start..].iter().map(|(id, _)| id.clone()).collect());
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next.clone(), Mark::OnStack);
                        let children = targets(&next);
                        stack.push((next, children));
                    }
                }
            } else if let Some((finished, _)) = stack.pop() {
                marks.insert(finished, Mark::Done);
            }
        }
    }
    None
}

fn reachable_from_triggers(graph: &WorkflowGraph) -> HashSet<NodeId> {
    let mut reachable: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = graph.triggers().map(|node| node.id.clone()).collect();
    while let Some(node_id) = queue.pop_front() {
        if !reachable.insert(node_id.clone()) {
            continue;
        }
        for conn in graph.outgoing(&node_id) {
            if !reachable.contains(&conn.target) {
                queue.push_back(conn.target.clone());
            }
        }
    }
    reachable
}

fn check_arity(graph: &WorkflowGraph, node: &WorkflowNode) -> Result<(), ValidationError> {
    let (direction, required, actual) = match node.node_type() {
        NodeType::Branch => (
            Direction::Outgoing,
            BRANCH_MIN_OUTGOING,
            graph.outgoing(&node.id).len(),
        ),
        NodeType::Merge => (
            Direction::Incoming,
            MERGE_MIN_INCOMING,
            graph.incoming(&node.id).len(),
        ),
        _ => return Ok(()),
    };
    if actual < required {
        return Err(ValidationError::Arity {
            node_id: node.id.clone(),
            node_type: node.node_type(),
            direction,
            required,
            actual,
        });
    }
    Ok(())
}

fn check_trigger_incoming(
    graph: &WorkflowGraph,
    node: &WorkflowNode,
) -> Result<(), ValidationError> {
    if !node.is_trigger() {
        return Ok(());
    }
    match graph.incoming(&node.id).first() {
        Some(conn) => Err(ValidationError::TriggerHasIncoming {
            node_id: node.id.clone(),
            connection_id: conn.id.clone(),
        }),
        None => Ok(()),
    }
}

/// Checks a node's configuration, compiling condition expressions.
fn check_config(node: &WorkflowNode) -> Result<Option<Expression>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidConfig {
        node_id: node.id.clone(),
        reason,
    };

    if node.id.as_str() == INPUT_KEY {
        return Err(invalid(format!(
            "node id `{INPUT_KEY}` is reserved for run input"
        )));
    }

    match &node.config {
        NodeConfig::Condition(config) => Expression::parse(&config.expression)
            .map(Some)
            .map_err(|e| invalid(format!("condition expression: {e}"))),
        NodeConfig::Trigger(TriggerConfig::Schedule {
            cron_expression, ..
        }) if cron_expression.trim().is_empty() => {
            Err(invalid("schedule trigger has an empty cron expression".to_string()))
        }
        NodeConfig::Trigger(TriggerConfig::Webhook { path }) if !path.starts_with('/') => Err(
            invalid(format!("webhook path `{path}` must start with `/`")),
        ),
        NodeConfig::Trigger(TriggerConfig::Event { event_type }) if event_type.is_empty() => {
            Err(invalid("event trigger has an empty event type".to_string()))
        }
        _ => Ok(None),
    }
}

/// Finds a condition's outgoing connections that no outcome activates.
fn unroutable_handles(graph: &WorkflowGraph, node: &WorkflowNode) -> Vec<PlanWarning> {
    let mut outgoing = graph.outgoing(&node.id);
    outgoing.sort_by(|a, b| a.id.cmp(&b.id));
    outgoing
        .into_iter()
        .filter_map(|conn| match conn.source_handle.as_deref() {
            None | Some(HANDLE_TRUE | HANDLE_FALSE) => None,
            Some(handle) => Some(PlanWarning::UnroutableHandle {
                node_id: node.id.clone(),
                connection_id: conn.id.clone(),
                handle: handle.to_string(),
            }),
        })
        .collect()
}

/// Assigns each reachable node the level one past its deepest reachable
/// predecessor.
fn assign_levels(
    graph: &WorkflowGraph,
    reachable: &HashSet<NodeId>,
) -> Result<Vec<(NodeId, usize)>, ValidationError> {
    let pg = graph.petgraph();
    let order = toposort(pg, None).map_err(|cycle| ValidationError::CycleDetected {
        nodes: pg
            .node_weight(cycle.node_id())
            .map(|node| vec![node.id.clone()])
            .unwrap_or_default(),
    })?;

    let mut levels: HashMap<NodeId, usize> = HashMap::new();
    let mut assigned = Vec::with_capacity(reachable.len());
    for index in order {
        let Some(node) = pg.node_weight(index) else {
            continue;
        };
        if !reachable.contains(&node.id) {
            continue;
        }
        let level = graph
            .incoming(&node.id)
            .iter()
            .filter_map(|conn| levels.get(&conn.source))
            .max()
            .map_or(0, |deepest| deepest + 1);
        levels.insert(node.id.clone(), level);
        assigned.push((node.id.clone(), level));
    }
    Ok(assigned)
}
