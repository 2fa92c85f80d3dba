//! 航線相依圖。邊 A → B 表示 A 的延誤會傳遞到 B。
//! 圖由呼叫端建立，預測器只讀取。

use crate::domain::model::{DependencyEdge, ObservationBatch, RouteId, RouteObservations};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct RouteDependencyGraph {
    graph: DiGraph<RouteId, ()>,
    index: HashMap<RouteId, NodeIndex>,
}

/// 拓撲順序中的一個處理單位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationUnit {
    pub routes: Vec<RouteId>,
    /// 多節點強連通分量或自我迴圈
    pub cyclic: bool,
}

impl RouteDependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_route(&mut self, route_id: &str) -> NodeIndex {
        if let Some(node) = self.index.get(route_id) {
            return *node;
        }
        let node = self.graph.add_node(route_id.to_string());
        self.index.insert(route_id.to_string(), node);
        node
    }

    /// 重複的邊只保留一條，避免同一條邊傳遞兩次
    pub fn add_dependency(&mut self, from: &str, to: &str) {
        let a = self.add_route(from);
        let b = self.add_route(to);
        if !self.graph.contains_edge(a, b) {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn from_edges(edges: &[DependencyEdge]) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.add_dependency(&edge.from, &edge.to);
        }
        graph
    }

    /// 共用港口推導相依：A 的目的港是 B 的起運港時加入 A → B
    pub fn from_shared_ports(routes: &[RouteObservations]) -> Self {
        let mut graph = Self::new();
        for route in routes {
            graph.add_route(&route.route_id);
        }
        for upstream in routes {
            let Some(destination) = upstream.destination_port.as_deref() else {
                continue;
            };
            for downstream in routes {
                if downstream.route_id != upstream.route_id
                    && downstream.origin_port.as_deref() == Some(destination)
                {
                    graph.add_dependency(&upstream.route_id, &downstream.route_id);
                }
            }
        }
        graph
    }

    pub fn from_batch(batch: &ObservationBatch) -> Self {
        let mut graph = Self::from_shared_ports(&batch.routes);
        for edge in &batch.dependencies {
            graph.add_dependency(&edge.from, &edge.to);
        }
        graph
    }

    pub fn contains_route(&self, route_id: &str) -> bool {
        self.index.contains_key(route_id)
    }

    pub fn route_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn has_dependency(&self, from: &str, to: &str) -> bool {
        match (self.index.get(from), self.index.get(to)) {
            (Some(a), Some(b)) => self.graph.contains_edge(*a, *b),
            _ => false,
        }
    }

    pub fn predecessors(&self, route_id: &str) -> Vec<&str> {
        let Some(node) = self.index.get(route_id) else {
            return Vec::new();
        };
        let mut upstream: Vec<&str> = self
            .graph
            .neighbors_directed(*node, Direction::Incoming)
            .map(|n| self.graph[n].as_str())
            .collect();
        upstream.sort_unstable();
        upstream
    }

    /// Tarjan 強連通分量，依拓撲順序（上游在前）排列
    pub fn propagation_order(&self) -> Vec<PropagationUnit> {
        // tarjan_scc 回傳的是反向拓撲順序
        let mut components = tarjan_scc(&self.graph);
        components.reverse();

        components
            .into_iter()
            .map(|nodes| {
                let cyclic = nodes.len() > 1
                    || nodes
                        .first()
                        .is_some_and(|n| self.graph.contains_edge(*n, *n));
                let mut routes: Vec<RouteId> =
                    nodes.into_iter().map(|n| self.graph[n].clone()).collect();
                routes.sort_unstable();
                PropagationUnit { routes, cyclic }
            })
            .collect()
    }
}
