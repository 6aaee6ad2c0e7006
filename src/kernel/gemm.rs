//! Mapping of problem dimensions onto GEMM roles.

use std::fmt;

use crate::ir::{Dim, Tile};

use super::desc::Prop;

/// GEMM role of a problem dimension: batch, rows, columns or reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bmnk {
    B,
    M,
    N,
    K,
}

impl Bmnk {
    pub const ALL: [Bmnk; 4] = [Bmnk::B, Bmnk::M, Bmnk::N, Bmnk::K];
}

impl fmt::Display for Bmnk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Bmnk::B => "b",
            Bmnk::M => "m",
            Bmnk::N => "n",
            Bmnk::K => "k",
        };
        f.write_str(s)
    }
}

/// GEMM role of `dim` under `prop`. Plain `b`/`m`/`n`/`k` keep their role;
/// convolution dimensions follow the propagation kind.
pub fn to_gemm(dim: &Dim, prop: Prop) -> Option<Bmnk> {
    let d = dim.as_str();
    match d {
        "b" | "g" => return Some(Bmnk::B),
        "m" => return Some(Bmnk::M),
        "n" => return Some(Bmnk::N),
        "k" => return Some(Bmnk::K),
        _ => {}
    }
    let is_out_spatial = matches!(d, "od" | "oh" | "ow");
    let is_in_spatial = matches!(d, "id" | "ih" | "iw");
    let is_kernel = matches!(d, "kd" | "kh" | "kw");
    let role = match prop {
        Prop::Fwd => match d {
            "mb" => Bmnk::M,
            "oc" => Bmnk::N,
            "ic" => Bmnk::K,
            _ if is_out_spatial => Bmnk::M,
            _ if is_kernel => Bmnk::K,
            _ => return None,
        },
        Prop::BwdData => match d {
            "mb" => Bmnk::M,
            "ic" => Bmnk::N,
            "oc" => Bmnk::K,
            _ if is_in_spatial => Bmnk::M,
            _ if is_kernel => Bmnk::K,
            _ => return None,
        },
        Prop::BwdWeights => match d {
            "ic" => Bmnk::M,
            "oc" => Bmnk::N,
            "mb" => Bmnk::K,
            _ if is_kernel => Bmnk::M,
            _ if is_out_spatial => Bmnk::K,
            _ => return None,
        },
    };
    Some(role)
}

/// Per-role product of the extents in `tile`; roles absent from the tile
/// are 1. Indexed in `Bmnk::ALL` order.
pub fn gemm_tile(tile: &Tile, prop: Prop) -> [i64; 4] {
    let mut ret = [1i64; 4];
    for (d, v) in tile.iter() {
        if let Some(role) = to_gemm(d, prop) {
            ret[role as usize] *= v;
        }
    }
    ret
}

/// Dimensions of `sizes` ordered by role, `roles` outermost first.
pub fn order_by_role(sizes: &Tile, roles: &[Bmnk], prop: Prop) -> Vec<Dim> {
    let mut ret = Vec::new();
    for role in roles {
        for d in sizes.dims() {
            if to_gemm(d, prop) == Some(*role) {
                ret.push(d.clone());
            }
        }
    }
    ret
}
