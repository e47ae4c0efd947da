//! Communication graph between ranks
use std::collections::BTreeSet;

use crate::traits::types::{FmmError, Result};

use super::types::{CommunicationGraph, Distribution, InteractionMatrix};

/// Neighbour sets of every rank implied by a set of interactions.
///
/// Each selected pair `(i, j)` connects the owners of `i` and `j` in both
/// directions. Pairs owned by a single rank produce a self edge, which is kept.
pub fn graph_edges(
    considered: &InteractionMatrix,
    distribution: &Distribution,
) -> Result<CommunicationGraph> {
    if considered.size() != distribution.len() {
        return Err(FmmError::SizeMismatch {
            what: "interaction matrix",
            expected: distribution.len(),
            found: considered.size(),
        });
    }

    let mut result = vec![BTreeSet::new(); distribution.nprocs()];
    for (i, j) in considered.nonzeros() {
        let (ri, rj) = (distribution.owner(i), distribution.owner(j));
        result[rj].insert(ri);
        result[ri].insert(rj);
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::topology::{classify, partition};

    #[test]
    fn test_graph_banded() {
        // Ten scatterers over three ranks: [0..4), [4..7), [7..10)
        let distribution = partition(10, 3).unwrap();

        let graph = graph_edges(&classify(10, 1), &distribution).unwrap();
        assert_eq!(graph[0], BTreeSet::from([0, 1]));
        assert_eq!(graph[1], BTreeSet::from([0, 1, 2]));
        assert_eq!(graph[2], BTreeSet::from([1, 2]));

        let graph = graph_edges(&classify(10, 1).complement(), &distribution).unwrap();
        assert_eq!(graph[0], BTreeSet::from([0, 1, 2]));
        assert_eq!(graph[2], BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_graph_symmetric_for_asymmetric_matrix() {
        let distribution = partition(6, 3).unwrap();
        let mut matrix = InteractionMatrix::filled(6, false);
        matrix.set(0, 5, true);

        let graph = graph_edges(&matrix, &distribution).unwrap();
        assert_eq!(graph[0], BTreeSet::from([2]));
        assert_eq!(graph[2], BTreeSet::from([0]));
        assert!(graph[1].is_empty());

        // Undirected edges make the transpose produce the same graph
        assert_eq!(graph, graph_edges(&matrix.transpose(), &distribution).unwrap());
    }

    #[test]
    fn test_graph_idle_ranks() {
        let distribution = partition(2, 4).unwrap();
        let graph = graph_edges(&classify(2, 5), &distribution).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph[2].is_empty() && graph[3].is_empty());
    }

    #[test]
    fn test_graph_size_mismatch() {
        let distribution = partition(4, 2).unwrap();
        assert!(graph_edges(&classify(5, 1), &distribution).is_err());
    }

    #[test]
    fn test_graph_deterministic() {
        let distribution = partition(13, 4).unwrap();
        let matrix = classify(13, 2);
        assert_eq!(
            graph_edges(&matrix, &distribution).unwrap(),
            graph_edges(&matrix, &distribution).unwrap()
        );
    }
}
