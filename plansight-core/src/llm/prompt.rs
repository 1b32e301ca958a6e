//! Prompt construction and few-shot exemplar loading.

use std::fmt::Write as _;
use std::path::Path;

use crate::markers::ProjectContext;

/// Pre-recorded true-positive crops anchoring the model's recognition.
///
/// Exemplars live as `circular_*.png` and `triangle_*.png` files in a
/// directory chosen at deployment time; an empty set degrades the prompt
/// instead of failing startup.
#[derive(Debug, Clone, Default)]
pub struct ExemplarSet {
    circular: Vec<Vec<u8>>,
    triangular: Vec<Vec<u8>>,
}

/// How many exemplars of each kind a prompt carries at most.
const MAX_CIRCULAR: usize = 4;
const MAX_TRIANGULAR: usize = 3;

impl ExemplarSet {
    /// Loads exemplar images from a directory.
    ///
    /// Files are picked in name order so the same deployment always builds
    /// the same prompt. A missing directory yields an empty set.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let mut set = Self::default();
        let Ok(entries) = std::fs::read_dir(dir) else {
            log::warn!("exemplar directory {} not readable", dir.display());
            return set;
        };
        let mut names: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        names.sort();

        for path in names {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let target = if stem.starts_with("circular_") && set.circular.len() < MAX_CIRCULAR {
                &mut set.circular
            } else if stem.starts_with("triangle_") && set.triangular.len() < MAX_TRIANGULAR {
                &mut set.triangular
            } else {
                continue;
            };
            match std::fs::read(&path) {
                Ok(bytes) => target.push(bytes),
                Err(e) => log::warn!("couldn't read exemplar {}: {e}", path.display()),
            }
        }
        log::info!(
            "loaded {} circular + {} triangular exemplars from {}",
            set.circular.len(),
            set.triangular.len(),
            dir.display()
        );
        set
    }

    /// All exemplar images, circular first.
    #[must_use]
    pub fn images(&self) -> Vec<&[u8]> {
        self.circular
            .iter()
            .chain(self.triangular.iter())
            .map(Vec::as_slice)
            .collect()
    }

    /// Number of exemplar images.
    #[must_use]
    pub fn count(&self) -> usize {
        self.circular.len() + self.triangular.len()
    }
}

/// Builds the full instruction text for one validation batch.
///
/// The anti-hallucination clauses are the load-bearing part: the model must
/// never analyze the exemplars, never emit more objects than candidates,
/// and must keep candidate order so outputs map back positionally.
#[must_use]
pub fn build_prompt(ctx: &ProjectContext, exemplar_count: usize, candidate_count: usize) -> String {
    let mut p = String::new();
    p.push_str(
        "You are analyzing construction plan drawings to find REFERENCE MARKERS.\n\n\
         There are TWO types of reference markers used in North American construction plans:\n\n\
         1. CIRCULAR markers (detail/section callouts): show Detail Number / Sheet Reference,\n\
            e.g. \"3/A7\" means \"Detail 3 on Sheet A7\". Often attached to a leader line; the\n\
            text can be rotated 0, 90, 180 or 270 degrees.\n\
         2. TRIANGULAR markers (revision deltas): same detail/sheet format, but the triangle\n\
            means \"revision\". Usually solid black or filled.\n\n",
    );

    if !ctx.valid_sheets.is_empty() {
        let sheets = ctx
            .valid_sheets
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        let details = ctx.details().into_iter().collect::<Vec<_>>().join(", ");
        let _ = writeln!(p, "Valid sheet names for this plan: {sheets}");
        let _ = writeln!(p, "Valid detail identifiers: {details}");
        p.push_str(
            "Use fuzzy matching for OCR-style errors (e.g. \"AS\" vs \"A5\"). If a sheet is\n\
             not in the valid list, report it with is_valid=false and low confidence.\n\
             Be careful with N vs 6 confusion.\n\n",
        );
    }

    if exemplar_count > 0 {
        let _ = writeln!(
            p,
            "The first {exemplar_count} images are EXAMPLES of true markers. DO NOT analyze \
             them and DO NOT include them in your output."
        );
    }
    let _ = writeln!(
        p,
        "After the examples you will see {candidate_count} CANDIDATE images. For each \
         candidate, decide whether it contains a valid reference marker."
    );

    p.push_str(
        "\nOUTPUT FORMAT: a JSON array of objects\n\
         {\"detail\": \"3\", \"sheet\": \"A7\", \"type\": \"circular\", \"confidence\": 0.95,\n\
          \"is_valid\": true, \"fuzzy_matched\": false, \"reason\": \"...\"}\n\n\
         CRITICAL RULES TO PREVENT HALLUCINATION:\n\
         1. Return AT MOST one object per candidate image, in the order the candidates appear.\n\
         2. If a candidate is NOT a valid marker, return nothing for it (skip it).\n\
         3. Your output array length must be <= the number of candidate images.\n\
         4. DO NOT invent sequential markers (1/A5, 2/A5, 3/A5, ...). Only report what you see.\n\
         5. Ignore legend tables, title blocks, dimension text and plain circles.\n\n\
         Respond ONLY with the JSON array. No other text.\n",
    );
    p
}
