use candle_core::{Result, Tensor};

/// A message-passing layer over `xs: [num_nodes, dim]` and `edge_index: [2, num_edges]`.
///
/// Row 0 of `edge_index` is the receiving node, row 1 the sending node.
pub trait GnnModule {
    fn forward_t(&self, xs: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor>;

    fn forward(&self, xs: &Tensor, edge_index: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, edge_index, false)
    }
}
