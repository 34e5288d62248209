#[derive(Debug, Clone)]
pub struct HnswNode {
    pub id: u32,
    pub level: u8,
    /// Unit-length copy of the inserted vector
    pub vector: Vec<f32>,
    /// Neighbor ids per layer, `level + 1` layers
    pub neighbors: Vec<Vec<u32>>,
}

impl HnswNode {
    pub fn new(id: u32, level: u8, vector: Vec<f32>) -> Self {
        HnswNode {
            id,
            level,
            vector,
            neighbors: vec![Vec::new(); level as usize + 1],
        }
    }

    pub fn neighbors_at(&self, layer: u8) -> &[u32] {
        self.neighbors
            .get(layer as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Add a link unless it already exists; returns whether it was added.
    pub fn link(&mut self, layer: u8, neighbor: u32) -> bool {
        match self.neighbors.get_mut(layer as usize) {
            Some(list) if !list.contains(&neighbor) && neighbor != self.id => {
                list.push(neighbor);
                true
            }
            _ => false,
        }
    }
}
