use std::collections::{BinaryHeap, HashSet};
use std::marker::PhantomData;

use num_traits::AsPrimitive;
use ordered_float::OrderedFloat;
use utils::{DistanceCalculator, L2DistanceCalculator};

use crate::vector::{VectorElement, VectorStorage};

/// Query-time candidate consumer. The index feeds it every id found in a
/// colliding bucket; the scanner is the only authority on distance
/// computation, top-K maintenance and duplicate suppression.
pub trait Scanner<T: VectorElement> {
    fn reset(&mut self, query: &[T]);

    /// Offer one candidate id. May be called multiple times with the same id.
    fn visit(&mut self, id: u32);

    /// Build the final result set. Called exactly once per query.
    fn finish(&mut self);
}

/// Exact top-K scanner: ranks candidates by L2 distance against the borrowed
/// storage, keeping each id at most once.
pub struct TopKScanner<'a, T: VectorElement, S: VectorStorage<T>> {
    storage: &'a S,
    topk: usize,
    query: Vec<f32>,
    visited: HashSet<u32>,
    heap: BinaryHeap<(OrderedFloat<f32>, u32)>,
    results: Vec<(u32, f32)>,

    _marker: PhantomData<T>,
}

impl<'a, T: VectorElement, S: VectorStorage<T>> TopKScanner<'a, T, S> {
    pub fn new(storage: &'a S, topk: usize) -> Self {
        Self {
            storage,
            topk,
            query: Vec::new(),
            visited: HashSet::new(),
            heap: BinaryHeap::new(),
            results: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Number of distinct candidates offered since the last reset.
    pub fn num_candidates(&self) -> usize {
        self.visited.len()
    }

    /// `(id, distance)` pairs in ascending distance order. Empty until
    /// `finish` has been called.
    pub fn results(&self) -> &[(u32, f32)] {
        &self.results
    }
}

impl<'a, T: VectorElement, S: VectorStorage<T>> Scanner<T> for TopKScanner<'a, T, S> {
    fn reset(&mut self, query: &[T]) {
        self.query = query.iter().map(|v| v.as_()).collect();
        self.visited.clear();
        self.heap.clear();
        self.results.clear();
    }

    fn visit(&mut self, id: u32) {
        if !self.visited.insert(id) {
            return;
        }
        let vector = match self.storage.get(id) {
            Some(vector) => vector,
            None => return,
        };
        let vector: Vec<f32> = vector.iter().map(|v| v.as_()).collect();
        let distance = L2DistanceCalculator::calculate(&self.query, &vector);
        self.heap.push((OrderedFloat(distance), id));
        if self.heap.len() > self.topk {
            self.heap.pop();
        }
    }

    fn finish(&mut self) {
        self.results = std::mem::take(&mut self.heap)
            .into_sorted_vec()
            .into_iter()
            .map(|(distance, id)| (id, distance.0))
            .collect();
    }
}
