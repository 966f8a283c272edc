use ndarray::{Array3, ArrayView3, Axis, Slice};
use sphcrop_core::types::Size2;

/// Cuts a `(size.h, size.w, C)` window centred on `(x, y)` out of an `(H, W, C)` frame.
///
/// Columns wrap around the frame width since longitude is periodic on an
/// equirectangular panorama. Rows above the top or below the bottom are zero.
/// Any anchor is accepted; far-out-of-frame rows just come back zeroed.
pub fn crop_image(frame: ArrayView3<'_, f32>, x: i64, y: i64, size: Size2) -> Array3<f32> {
    let (height, width, channels) = frame.dim();
    let mut out = Array3::<f32>::zeros((size.h, size.w, channels));
    if height == 0 || width == 0 {
        return out;
    }

    let width_i = width as i64;
    let left = x.rem_euclid(width_i) - (size.w as i64) / 2;
    let top = y.saturating_sub((size.h as i64) / 2);
    for row in 0..size.h {
        let src_y = top.saturating_add(row as i64);
        if src_y < 0 || src_y >= height as i64 {
            continue;
        }
        let src_row = frame.index_axis(Axis(0), src_y as usize);
        let mut dst_row = out.index_axis_mut(Axis(0), row);
        for col in 0..size.w {
            let src_x = (left + col as i64).rem_euclid(width_i) as usize;
            dst_row
                .index_axis_mut(Axis(0), col)
                .assign(&src_row.index_axis(Axis(0), src_x));
        }
    }
    out
}

/// Keeps every `stride`-th row and column.
pub fn subsample(crop: Array3<f32>, stride: usize) -> Array3<f32> {
    if stride <= 1 {
        return crop;
    }
    let step = Slice::new(0, None, stride as isize);
    crop.slice_axis(Axis(0), step)
        .slice_axis(Axis(1), step)
        .to_owned()
}
