//! In-memory road network that snapshots are merged onto.
//!
//! The snapshot store only needs the narrow [`LinkNetwork`] contract:
//! enumerate links, find a link by key, and read or replace the graph-wide
//! default speed. [`RoadGraph`] is the implementation used by the CLI and by
//! tests; callers with their own network type implement the trait instead.

use std::collections::HashMap;
use std::path::Path;

use facet::Facet;
use linktime_types::{LinkKey, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("duplicate link {0}")]
    DuplicateLink(LinkKey),
    #[error("link {0} uses the reserved default-speed key")]
    ReservedKey(LinkKey),
    #[error("read network file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decode network file {path}: {message}")]
    Decode { path: String, message: String },
    #[error("encode network: {0}")]
    Encode(String),
}

// ── Links ───────────────────────────────────────────────────────

/// A directed road segment and its current traffic state.
#[derive(Facet, Debug, Clone, PartialEq)]
pub struct Link {
    pub begin_node_id: NodeId,
    pub end_node_id: NodeId,
    /// Segment length, in the same distance unit speeds are expressed in.
    pub length: f64,
    /// Travel time across the segment.
    #[facet(default)]
    pub time: f64,
    #[facet(default)]
    pub speed: f64,
    /// Trips backing `time`; zero means the link carries no observation.
    #[facet(default)]
    pub observation_count: u32,
}

impl Link {
    pub fn new(begin: i64, end: i64, length: f64) -> Self {
        Self {
            begin_node_id: NodeId::new(begin),
            end_node_id: NodeId::new(end),
            length,
            time: 0.0,
            speed: 0.0,
            observation_count: 0,
        }
    }

    pub fn key(&self) -> LinkKey {
        LinkKey {
            begin: self.begin_node_id,
            end: self.end_node_id,
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observation_count > 0
    }

    /// `length / travel_time`, or `None` when either operand would make the
    /// result zero, infinite or NaN.
    pub fn speed_for(&self, travel_time: f64) -> Option<f64> {
        let usable = |value: f64| value.is_finite() && value != 0.0;
        if !usable(self.length) || !usable(travel_time) {
            return None;
        }
        Some(self.length / travel_time)
    }
}

// ── Contract consumed by the snapshot store ─────────────────────

pub trait LinkNetwork {
    /// Every link, in a stable iteration order.
    fn links(&self) -> impl Iterator<Item = &Link>;

    fn links_mut(&mut self) -> impl Iterator<Item = &mut Link>;

    fn link_mut(&mut self, key: LinkKey) -> Option<&mut Link>;

    /// Graph-wide fallback speed, if one is known.
    fn default_speed(&self) -> Option<f64>;

    /// Record the fallback speed. Link speeds are not touched.
    fn set_default_speed(&mut self, speed: Option<f64>);
}

// ── The graph itself ────────────────────────────────────────────

/// On-disk shape of a network file.
#[derive(Facet, Debug, Clone)]
struct NetworkFile {
    #[facet(default)]
    default_speed: Option<f64>,
    links: Vec<Link>,
}

#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    links: Vec<Link>,
    index: HashMap<LinkKey, usize>,
    default_speed: Option<f64>,
}

impl RoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from links in iteration order.
    pub fn from_links(links: impl IntoIterator<Item = Link>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for link in links {
            graph.add_link(link)?;
        }
        Ok(graph)
    }

    pub fn add_link(&mut self, link: Link) -> Result<(), GraphError> {
        let key = link.key();
        if key.is_sentinel() {
            return Err(GraphError::ReservedKey(key));
        }
        if self.index.contains_key(&key) {
            return Err(GraphError::DuplicateLink(key));
        }
        self.index.insert(key, self.links.len());
        self.links.push(link);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn link(&self, key: LinkKey) -> Option<&Link> {
        self.index.get(&key).map(|&slot| &self.links[slot])
    }

    /// Set the fallback speed and write it into every link.
    pub fn set_all_link_speeds(&mut self, speed: f64) {
        self.default_speed = Some(speed);
        for link in &mut self.links {
            link.speed = speed;
        }
    }

    pub fn from_json(text: &str, origin: &str) -> Result<Self, GraphError> {
        let file: NetworkFile =
            facet_json::from_str(text).map_err(|error| GraphError::Decode {
                path: origin.to_string(),
                message: error.to_string(),
            })?;
        let mut graph = Self::from_links(file.links)?;
        graph.default_speed = file.default_speed;
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String, GraphError> {
        let file = NetworkFile {
            default_speed: self.default_speed,
            links: self.links.clone(),
        };
        facet_json::to_string(&file).map_err(|error| GraphError::Encode(error.to_string()))
    }

    pub fn read_file(path: &Path) -> Result<Self, GraphError> {
        let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    pub fn write_file(&self, path: &Path) -> Result<(), GraphError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| GraphError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

impl LinkNetwork for RoadGraph {
    fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    fn links_mut(&mut self) -> impl Iterator<Item = &mut Link> {
        self.links.iter_mut()
    }

    fn link_mut(&mut self, key: LinkKey) -> Option<&mut Link> {
        let slot = *self.index.get(&key)?;
        self.links.get_mut(slot)
    }

    fn default_speed(&self) -> Option<f64> {
        self.default_speed
    }

    fn set_default_speed(&mut self, speed: Option<f64>) {
        self.default_speed = speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_link_graph() -> RoadGraph {
        RoadGraph::from_links([Link::new(1, 2, 100.0), Link::new(2, 3, 50.0)])
            .expect("graph should build")
    }

    #[test]
    fn lookup_by_key_finds_links() {
        let mut graph = two_link_graph();
        assert_eq!(graph.len(), 2);
        assert_eq!(
            graph.link(LinkKey::new(2, 3)).map(|link| link.length),
            Some(50.0)
        );
        assert!(graph.link(LinkKey::new(3, 2)).is_none());

        graph
            .link_mut(LinkKey::new(1, 2))
            .expect("link 1->2 exists")
            .observation_count = 4;
        assert_eq!(
            graph.link(LinkKey::new(1, 2)).map(|l| l.observation_count),
            Some(4)
        );
    }

    #[test]
    fn duplicate_and_reserved_keys_are_rejected() {
        let mut graph = two_link_graph();
        let err = graph.add_link(Link::new(1, 2, 10.0)).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateLink(key) if key == LinkKey::new(1, 2)));

        let err = graph.add_link(Link::new(0, 0, 10.0)).unwrap_err();
        assert!(matches!(err, GraphError::ReservedKey(_)));
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let graph = RoadGraph::from_links([
            Link::new(9, 1, 1.0),
            Link::new(1, 9, 1.0),
            Link::new(5, 5, 1.0),
        ])
        .unwrap();
        let keys: Vec<_> = graph.links().map(Link::key).collect();
        assert_eq!(
            keys,
            vec![LinkKey::new(9, 1), LinkKey::new(1, 9), LinkKey::new(5, 5)]
        );
    }

    #[test]
    fn speed_for_refuses_degenerate_operands() {
        let link = Link::new(1, 2, 50.0);
        assert_eq!(link.speed_for(10.0), Some(5.0));
        assert_eq!(link.speed_for(0.0), None);
        assert_eq!(link.speed_for(f64::NAN), None);
        assert_eq!(Link::new(1, 2, 0.0).speed_for(10.0), None);
    }

    #[test]
    fn set_all_link_speeds_records_default() {
        let mut graph = two_link_graph();
        graph.set_all_link_speeds(15.0);
        assert_eq!(graph.default_speed(), Some(15.0));
        assert!(graph.links().all(|link| link.speed == 15.0));
    }

    #[test]
    fn network_file_round_trips_through_json() {
        let mut graph = two_link_graph();
        graph.set_default_speed(Some(12.5));
        let link = graph.link_mut(LinkKey::new(2, 3)).unwrap();
        link.time = 10.0;
        link.observation_count = 3;

        let json = graph.to_json().expect("graph should encode");
        let decoded = RoadGraph::from_json(&json, "memory").expect("graph should decode");
        assert_eq!(decoded.default_speed(), Some(12.5));
        assert_eq!(decoded.link(LinkKey::new(2, 3)), graph.link(LinkKey::new(2, 3)));
    }

    #[test]
    fn network_file_fields_default_to_unobserved() {
        let json = r#"{"links":[{"begin_node_id":7,"end_node_id":8,"length":30.0}]}"#;
        let graph = RoadGraph::from_json(json, "inline").expect("minimal file should decode");
        assert_eq!(graph.default_speed(), None);
        let link = graph.link(LinkKey::new(7, 8)).expect("link 7->8 exists");
        assert_eq!(link.observation_count, 0);
        assert_eq!(link.time, 0.0);
    }
}
