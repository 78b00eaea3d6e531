//! Constant padding with the input's zero-point.
//!
//! The optional padding tensor is `i32` `[2, rank]`: row 0 holds the
//! elements added before each dimension, row 1 those added after.

use kore_core::{BufferMut, DType, Interval, TensorPtr};
use kore_kernels::{copy_u8_u8, fill_u8};
use smallvec::SmallVec;

use crate::bounds::BoundsMap;
use crate::error::{OpError, Result};
use crate::ops::{expect_dtype, expect_rank, no_bounds, same_bytes, InputView};
use crate::quantize::u8_zero;
use crate::visitor::OpVisitor;

#[derive(Debug, Clone)]
pub struct PadOp {
    inputs: Vec<TensorPtr>,
    output: TensorPtr,
}

impl PadOp {
    pub fn new(input: TensorPtr, padding: Option<TensorPtr>, output: TensorPtr) -> Self {
        let mut inputs = vec![input];
        inputs.extend(padding);
        Self { inputs, output }
    }

    pub fn name(&self) -> &'static str {
        "Pad"
    }

    pub fn input(&self) -> &TensorPtr {
        &self.inputs[0]
    }

    pub fn padding(&self) -> Option<&TensorPtr> {
        self.inputs.get(1)
    }

    pub fn inputs(&self) -> &[TensorPtr] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorPtr {
        &self.output
    }

    /// Elements added before each output dimension.
    fn before(&self) -> Result<SmallVec<[i32; 6]>> {
        let rank = self.output.rank();
        let Some(padding) = self.padding() else {
            return Ok(SmallVec::from_elem(0, rank));
        };
        expect_dtype(padding, DType::I32)?;
        expect_rank(padding, 2)?;
        if padding.extent(0) != 2 || padding.extent(1) != rank as i32 {
            return Err(OpError::config(format!(
                "padding must be [2, {rank}], got {}",
                padding.shape()
            )));
        }
        let row = padding.bounds(0).min;
        let d0 = padding.bounds(1).min;
        (0..rank as i32)
            .map(|d| Ok(padding.get::<i32>(&[row, d0 + d])?))
            .collect()
    }

    pub fn map_bounds(&self, input: usize, output: usize) -> Result<BoundsMap> {
        if output != 0 {
            return Err(no_bounds(input, output));
        }
        let rank = self.output.rank();
        match (input, self.padding()) {
            (0, _) => {
                let before = self.before()?;
                Ok(before
                    .iter()
                    .enumerate()
                    .fold(BoundsMap::elementwise_all(rank), |map, (d, &b)| map.offset(d, -b)))
            }
            (1, Some(padding)) => Ok(BoundsMap::all(&padding.bounds_all(), rank)),
            _ => Err(no_bounds(input, output)),
        }
    }

    pub fn execute(&self) -> Result<()> {
        let input = self.input();
        expect_dtype(input, DType::U8)?;
        expect_dtype(&self.output, DType::U8)?;
        let rank = self.output.rank();
        expect_rank(input, rank)?;
        let before = self.before()?;
        let pad_value = u8_zero(input.quantization())? as u8;

        let mut in_layout = input.layout().clone();
        for (d, &b) in before.iter().enumerate() {
            in_layout.translate(d, b);
        }
        let view = InputView::new(input, &self.output);

        let mut out_bytes = self.output.storage().write();
        let mut out_layout = self.output.layout().clone();
        // Padding 3 channels to 4 is left to the copy, which fills the
        // missing channel as it goes.
        let fill_min_dim = usize::from(in_layout.dim(0).extent == 3 && out_layout.dim(0).extent == 4);
        for d in (fill_min_dim..rank).rev() {
            let have = in_layout.dim(d).interval();
            let want = out_layout.dim(d).interval();
            if want.min < have.min {
                let region = out_layout.cropped(d, Interval::new(want.min, have.min - 1));
                fill_u8(pad_value, &mut BufferMut::new(&mut out_bytes, region)?)?;
            }
            if want.max > have.max {
                let region = out_layout.cropped(d, Interval::new(have.max + 1, want.max));
                fill_u8(pad_value, &mut BufferMut::new(&mut out_bytes, region)?)?;
            }
            out_layout.crop(d, have);
        }

        let mut covered = in_layout.clone();
        for d in 0..rank {
            covered.crop(d, out_layout.dim(d).interval());
        }
        if same_bytes(input.storage(), &covered, self.output.storage(), &out_layout) {
            tracing::trace!("pad: input already in place");
            return Ok(());
        }
        let in_buf = view.buffer::<u8>(&in_layout)?;
        copy_u8_u8(&in_buf, pad_value, &mut BufferMut::new(&mut out_bytes, out_layout)?)?;
        Ok(())
    }

    pub fn accept(&self, visitor: &mut dyn OpVisitor) {
        visitor.visit_pad(self);
    }
}
