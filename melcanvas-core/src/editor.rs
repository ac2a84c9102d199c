//! Edits applied to a quantized spectrogram image.
//!
//! Every operation is a pure function from image to image of the same size.
//! The dB bounds are carried over unchanged.

use std::fmt;
use std::str::FromStr;

use ndarray::{s, Array2, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codec::QuantizedImage;
use crate::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOperation {
    /// Circular shift along the frequency axis. Positive moves content to
    /// higher rows; `-shift` undoes it.
    Scroll { shift: i64 },
    /// Reverses the frame order.
    FlipTime,
    /// Zeroes columns `x..x+width` of rows `y..y+height`, clipped to the image.
    /// Non-positive sizes leave the image untouched.
    CutRectangle {
        x: usize,
        y: usize,
        width: i64,
        height: i64,
    },
}

impl EditOperation {
    pub fn apply(&self, image: &QuantizedImage) -> QuantizedImage {
        let pixels = image.pixels();
        let edited = match *self {
            EditOperation::Scroll { shift } => scroll_rows(pixels, shift),
            EditOperation::FlipTime => pixels.slice(s![.., ..;-1]).to_owned(),
            EditOperation::CutRectangle {
                x,
                y,
                width,
                height,
            } => cut_rectangle(pixels, x, y, width, height),
        };
        log::debug!("applied {self} to {}x{} image", image.height(), image.width());
        image.with_pixels(edited)
    }

    /// A cut of random position and size, each side at most `max_fraction`
    /// of the image and at least one pixel.
    pub fn random_cut<R: Rng + ?Sized>(
        rng: &mut R,
        width: usize,
        height: usize,
        max_fraction: f64,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "cannot cut from an empty {width}x{height} image"
            )));
        }
        if !(max_fraction > 0.0 && max_fraction <= 1.0) {
            return Err(Error::InvalidParameter(format!(
                "max_fraction must be in (0, 1], got {max_fraction}"
            )));
        }

        let max_w = ((width as f64 * max_fraction).floor() as usize).max(1);
        let max_h = ((height as f64 * max_fraction).floor() as usize).max(1);
        let w = rng.gen_range(1..=max_w);
        let h = rng.gen_range(1..=max_h);
        Ok(EditOperation::CutRectangle {
            x: rng.gen_range(0..=width - w),
            y: rng.gen_range(0..=height - h),
            width: w as i64,
            height: h as i64,
        })
    }
}

fn scroll_rows(pixels: &Array2<u8>, shift: i64) -> Array2<u8> {
    let rows = pixels.nrows();
    if rows == 0 {
        return pixels.clone();
    }
    let shift = shift.rem_euclid(rows as i64) as usize;
    let mut out = Array2::zeros(pixels.dim());
    for (i, row) in pixels.axis_iter(Axis(0)).enumerate() {
        out.row_mut((i + shift) % rows).assign(&row);
    }
    out
}

fn cut_rectangle(pixels: &Array2<u8>, x: usize, y: usize, width: i64, height: i64) -> Array2<u8> {
    let mut out = pixels.clone();
    if width <= 0 || height <= 0 {
        return out;
    }
    let (rows, cols) = pixels.dim();
    let x0 = x.min(cols);
    let y0 = y.min(rows);
    let x1 = x.saturating_add(width as usize).min(cols);
    let y1 = y.saturating_add(height as usize).min(rows);
    out.slice_mut(s![y0..y1, x0..x1]).fill(0);
    out
}

impl fmt::Display for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditOperation::Scroll { shift } => write!(f, "scroll:{shift}"),
            EditOperation::FlipTime => write!(f, "flip-time"),
            EditOperation::CutRectangle {
                x,
                y,
                width,
                height,
            } => write!(f, "cut:{x},{y},{width},{height}"),
        }
    }
}

/// Parses `scroll:<shift>`, `flip-time` or `cut:<x>,<y>,<w>,<h>`.
impl FromStr for EditOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, args) = match s.split_once(':') {
            Some((name, args)) => (name.trim(), Some(args.trim())),
            None => (s, None),
        };

        match (name, args) {
            ("scroll", Some(args)) => Ok(EditOperation::Scroll {
                shift: parse_arg(args, "scroll shift")?,
            }),
            ("flip-time", None) => Ok(EditOperation::FlipTime),
            ("cut", Some(args)) => {
                let parts: Vec<&str> = args.split(',').map(str::trim).collect();
                let [x, y, w, h] = parts.as_slice() else {
                    return Err(Error::InvalidParameter(format!(
                        "cut expects x,y,width,height, got '{args}'"
                    )));
                };
                Ok(EditOperation::CutRectangle {
                    x: parse_arg(x, "cut x")?,
                    y: parse_arg(y, "cut y")?,
                    width: parse_arg(w, "cut width")?,
                    height: parse_arg(h, "cut height")?,
                })
            }
            ("scroll" | "cut", None) | ("flip-time", Some(_)) => Err(Error::InvalidParameter(
                format!("malformed arguments for '{name}' in '{s}'"),
            )),
            _ => Err(Error::UnknownOperation(name.to_string())),
        }
    }
}

fn parse_arg<T: FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidParameter(format!("{what}: cannot parse '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DbBounds;
    use rand::{rngs::StdRng, SeedableRng};

    fn image(rows: usize, cols: usize) -> QuantizedImage {
        let pixels = Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c + 1) as u8);
        QuantizedImage::new(
            pixels,
            DbBounds {
                min_db: -80.0,
                max_db: 0.0,
            },
        )
    }

    #[test]
    fn scroll_moves_rows_up_and_wraps() {
        let img = image(4, 3);
        let out = EditOperation::Scroll { shift: 1 }.apply(&img);
        assert_eq!(out.pixels().row(1), img.pixels().row(0));
        assert_eq!(out.pixels().row(0), img.pixels().row(3));
        assert_eq!(out.bounds(), img.bounds());
    }

    #[test]
    fn scroll_is_inverted_by_negative_shift() {
        let img = image(7, 5);
        for shift in [-15i64, -1, 0, 3, 7, 22] {
            let there = EditOperation::Scroll { shift }.apply(&img);
            let back = EditOperation::Scroll { shift: -shift }.apply(&there);
            assert_eq!(back, img, "shift {shift}");
        }
    }

    #[test]
    fn flip_is_involutive() {
        let img = image(3, 6);
        let flipped = EditOperation::FlipTime.apply(&img);
        assert_eq!(flipped.pixels()[[0, 0]], img.pixels()[[0, 5]]);
        assert_eq!(EditOperation::FlipTime.apply(&flipped), img);
    }

    #[test]
    fn cut_zeroes_only_the_rectangle() {
        let img = image(5, 5);
        let out = EditOperation::CutRectangle {
            x: 1,
            y: 2,
            width: 2,
            height: 2,
        }
        .apply(&img);
        for ((r, c), &v) in out.pixels().indexed_iter() {
            let inside = (2..4).contains(&r) && (1..3).contains(&c);
            if inside {
                assert_eq!(v, 0, "({r}, {c})");
            } else {
                assert_eq!(v, img.pixels()[[r, c]], "({r}, {c})");
            }
        }
    }

    #[test]
    fn cut_is_clamped_to_the_image() {
        let img = image(4, 4);
        let out = EditOperation::CutRectangle {
            x: 2,
            y: 3,
            width: 100,
            height: 100,
        }
        .apply(&img);
        assert!(out.pixels().slice(s![3.., 2..]).iter().all(|&v| v == 0));
        assert_eq!(out.pixels().slice(s![..3, ..]), img.pixels().slice(s![..3, ..]));

        let outside = EditOperation::CutRectangle {
            x: 10,
            y: 10,
            width: 3,
            height: 3,
        };
        assert_eq!(outside.apply(&img), img);
    }

    #[test]
    fn cut_with_non_positive_size_is_a_no_op() {
        let img = image(4, 4);
        for (width, height) in [(0, 2), (2, 0), (-3, 2), (2, -1)] {
            let op = EditOperation::CutRectangle {
                x: 0,
                y: 0,
                width,
                height,
            };
            assert_eq!(op.apply(&img), img);
        }
    }

    #[test]
    fn parses_textual_requests() {
        assert_eq!(
            "scroll:10".parse::<EditOperation>().unwrap(),
            EditOperation::Scroll { shift: 10 }
        );
        assert_eq!(
            " scroll: -3 ".parse::<EditOperation>().unwrap(),
            EditOperation::Scroll { shift: -3 }
        );
        assert_eq!("flip-time".parse::<EditOperation>().unwrap(), EditOperation::FlipTime);
        assert_eq!(
            "cut:1,2,30,40".parse::<EditOperation>().unwrap(),
            EditOperation::CutRectangle {
                x: 1,
                y: 2,
                width: 30,
                height: 40
            }
        );
        for op in [
            EditOperation::Scroll { shift: -4 },
            EditOperation::FlipTime,
            EditOperation::CutRectangle {
                x: 0,
                y: 9,
                width: -1,
                height: 5,
            },
        ] {
            assert_eq!(op.to_string().parse::<EditOperation>().unwrap(), op);
        }
    }

    #[test]
    fn rejects_unknown_or_malformed_requests() {
        assert!(matches!(
            "blur:3".parse::<EditOperation>(),
            Err(Error::UnknownOperation(name)) if name == "blur"
        ));
        assert!(matches!(
            "scroll:abc".parse::<EditOperation>(),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            "cut:1,2,3".parse::<EditOperation>(),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            "cut:-1,2,3,4".parse::<EditOperation>(),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!("scroll".parse::<EditOperation>(), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn serializes_as_tagged_enum() {
        let op = EditOperation::Scroll { shift: 10 };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"op":"scroll","shift":10}"#);
        let parsed: EditOperation = serde_json::from_str(r#"{"op":"flip_time"}"#).unwrap();
        assert_eq!(parsed, EditOperation::FlipTime);
    }

    #[test]
    fn random_cut_stays_inside_and_is_seedable() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..50 {
            let op = EditOperation::random_cut(&mut rng, 40, 20, 0.25).unwrap();
            let EditOperation::CutRectangle {
                x,
                y,
                width,
                height,
            } = op
            else {
                panic!("expected a cut, got {op:?}");
            };
            assert!((1..=10).contains(&width));
            assert!((1..=5).contains(&height));
            assert!(x + width as usize <= 40);
            assert!(y + height as usize <= 20);
        }

        let a = EditOperation::random_cut(&mut StdRng::seed_from_u64(5), 40, 20, 0.5).unwrap();
        let b = EditOperation::random_cut(&mut StdRng::seed_from_u64(5), 40, 20, 0.5).unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            EditOperation::random_cut(&mut StdRng::seed_from_u64(5), 0, 20, 0.5),
            Err(Error::InvalidParameter(_))
        ));
    }
}
