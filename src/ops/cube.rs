//! Cube-engine fractal blocking helpers shared by the matmul-shaped ops.
//!
//! The cube unit consumes operands in 16x16 fractal tiles; base blocks
//! are counted in fractals and sized so one base block's accumulator
//! fits the L0C budget and its operand panels fit L0A/L0B.

use crate::math::ceil_div;

/// Fractal edge in elements.
pub const FRACTAL: u64 = 16;

/// Bytes of one fractal tile at the given element width.
pub const fn fractal_bytes(elem_bytes: u64) -> u64 {
    FRACTAL * FRACTAL * elem_bytes
}

/// Fractal count covering `elems` elements of one axis.
pub fn fractal_count(elems: u64) -> u64 {
    ceil_div(elems.max(1), FRACTAL)
}

/// Split an `m_frac x n_frac` output (fractal units) into base-block tile
/// counts so that one base block holds at most `budget_fractals`
/// accumulator fractals. Starts from an aspect-preserving guess, repairs
/// it upward if needed, then greedily drops tile counts while the block
/// still fits.
pub fn base_mn_counts(m_frac: u64, n_frac: u64, budget_fractals: u64) -> (u64, u64) {
    debug_assert!(m_frac >= 1 && n_frac >= 1 && budget_fractals >= 1);
    if m_frac * n_frac <= budget_fractals {
        return (1, 1);
    }

    let fits = |m_cnt: u64, n_cnt: u64| {
        ceil_div(m_frac, m_cnt) * ceil_div(n_frac, n_cnt) <= budget_fractals
    };

    let scale = ((m_frac * n_frac) as f64 / budget_fractals as f64).sqrt().ceil() as u64;
    let mut m_cnt = ceil_div(m_frac, (m_frac / scale.max(1)).max(1)).min(m_frac);
    let mut n_cnt = ceil_div(n_frac, (n_frac / scale.max(1)).max(1)).min(n_frac);

    while !fits(m_cnt, n_cnt) {
        if m_cnt < m_frac && (m_cnt <= n_cnt || n_cnt >= n_frac) {
            m_cnt += 1;
        } else {
            n_cnt += 1;
        }
    }
    loop {
        if m_cnt > 1 && fits(m_cnt - 1, n_cnt) {
            m_cnt -= 1;
        } else if n_cnt > 1 && fits(m_cnt, n_cnt - 1) {
            n_cnt -= 1;
        } else {
            break;
        }
    }
    (m_cnt, n_cnt)
}

/// K-axis tile count: 1 when both operand panels of a base block fit
/// L0A/L0B outright, otherwise the K base shrinks by the worse of the
/// two overflow factors.
pub fn base_k_count(
    single_m_frac: u64,
    single_n_frac: u64,
    k_frac: u64,
    m_cnt: u64,
    n_cnt: u64,
    l0a_fractals: u64,
    l0b_fractals: u64,
) -> u64 {
    debug_assert!(l0a_fractals >= 1 && l0b_fractals >= 1);
    let mk = ceil_div(single_m_frac, m_cnt) * k_frac;
    let nk = ceil_div(single_n_frac, n_cnt) * k_frac;
    if mk <= l0a_fractals && nk <= l0b_fractals {
        return 1;
    }
    let m_pieces = mk as f64 / l0a_fractals as f64;
    let n_pieces = nk as f64 / l0b_fractals as f64;
    let base_k = ((k_frac as f64 / m_pieces.max(n_pieces)).floor() as u64).max(1);
    ceil_div(k_frac, base_k)
}
