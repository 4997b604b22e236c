use crate::{error::ServiceResult, preprocess::ImageTensor};

/// A loaded classifier. Implementations must tolerate concurrent callers.
pub trait ModelService: Send + Sync + 'static {
    /// One forward pass, returning the class score vector for the single
    /// image in the batch.
    fn infer(&self, input: &ImageTensor) -> ServiceResult<Vec<f32>>;
}
