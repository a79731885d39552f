//! Interface-vector slicing
//!
//! The controller emits one flat interface vector per step; each architecture
//! slices it into head parameters. The cursor below consumes consecutive
//! spans of the last dimension and fails loudly if the vector is too short.

use candle_core::Tensor;

use crate::error::MemoryError;
use crate::MemoryResult;

/// Cursor over the feature dimension of a `[batch, interface_size]` tensor.
pub struct InterfaceSplit<'a> {
    interface: &'a Tensor,
    size: usize,
    offset: usize,
}

impl<'a> InterfaceSplit<'a> {
    pub fn new(interface: &'a Tensor) -> MemoryResult<Self> {
        let (_batch, size) = interface.dims2()?;
        Ok(Self {
            interface,
            size,
            offset: 0,
        })
    }

    /// Take the next `len` features as `[batch, len]`.
    pub fn take(&mut self, len: usize) -> MemoryResult<Tensor> {
        if self.offset + len > self.size {
            return Err(MemoryError::ShapeMismatch {
                context: "interface split",
                expected: vec![self.offset + len],
                got: vec![self.size],
            });
        }
        let slice = self.interface.narrow(1, self.offset, len)?;
        self.offset += len;
        Ok(slice)
    }

    /// Take `heads * width` features reshaped to `[batch, heads, width]`.
    pub fn take_per_head(&mut self, heads: usize, width: usize) -> MemoryResult<Tensor> {
        let flat = self.take(heads * width)?;
        let batch = flat.dims2()?.0;
        Ok(flat.reshape((batch, heads, width))?)
    }

    /// Assert the whole vector was consumed; catches interface-size drift
    /// between the projection layer and the parser.
    pub fn finish(self) -> MemoryResult<()> {
        if self.offset != self.size {
            return Err(MemoryError::ShapeMismatch {
                context: "interface split leftover",
                expected: vec![self.offset],
                got: vec![self.size],
            });
        }
        Ok(())
    }
}
