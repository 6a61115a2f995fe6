//! Formula marking by math-symbol density
//!
//! Lines dense in Unicode math symbols are wrapped as
//! `[FORMULA: <line> :END_FORMULA]` so the rewriting stage knows to turn
//! them into LaTeX.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Math code points: italic Greek and Latin, super/subscripts, operators
pub static MATH_CHARS: Lazy<HashSet<char>> = Lazy::new(|| {
    concat!(
        "𝛼𝛽𝛾𝛿𝜀𝜁𝜂𝜃𝜄𝜅𝜆𝜇𝜈𝜉𝜊𝜋𝜌𝜎𝜏𝜐𝜑𝜒𝜓𝜔",
        "𝛢𝛣𝛤𝛥𝛦𝛧𝛨𝛩𝛪𝛫𝛬𝛭𝛮𝛯𝛰𝛱𝛲𝛳𝛴𝛵𝛶𝛷𝛸𝛹𝛺",
        "𝑎𝑏𝑐𝑑𝑒𝑓𝑔ℎ𝑖𝑗𝑘𝑙𝑚𝑛𝑜𝑝𝑞𝑟𝑠𝑡𝑢𝑣𝑤𝑥𝑦𝑧",
        "𝐴𝐵𝐶𝐷𝐸𝐹𝐺𝐻𝐼𝐽𝐾𝐿𝑀𝑁𝑂𝑃𝑄𝑅𝑆𝑇𝑈𝑉𝑊𝑋𝑌𝑍",
        "⁰¹²³⁴⁵⁶⁷⁸⁹⁺⁻⁼⁽⁾ⁿⁱ₀₁₂₃₄₅₆₇₈₉₊₋₌₍₎",
        "∑∏∫∬∭∮∯∰∇∂∆∀∃∈∉⊂⊃⊆⊇∪∩∧∨¬⊕⊗⊙",
        "≤≥≠≈≡≢∝∞±×÷√∛∜",
    )
    .chars()
    .collect()
});

/// A single one of these is enough when any math symbol is present
pub const BIG_OPERATORS: [char; 5] = ['∑', '∏', '∫', '∂', '∇'];

const FORMULA_OPEN: &str = "[FORMULA:";

/// Number of math symbols in a line
pub fn math_char_count(line: &str) -> usize {
    line.chars().filter(|c| MATH_CHARS.contains(c)).count()
}

/// Whether a line is dense enough in math symbols to be a formula
pub fn is_formula_line(line: &str) -> bool {
    let count = math_char_count(line);
    count >= 3 || (count >= 1 && line.contains(BIG_OPERATORS))
}

/// Wrap formula lines, leaving everything else untouched
///
/// Lines already wrapped are not wrapped again, so the pass is idempotent.
pub fn mark_formulas(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            let trimmed = line.trim();
            if is_formula_line(line) && !trimmed.starts_with(FORMULA_OPEN) {
                format!("{} {} :END_FORMULA]", FORMULA_OPEN, trimmed)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
