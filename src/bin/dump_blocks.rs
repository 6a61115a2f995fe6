use pdf_annotate::{ContentBlock, DocumentSource, LopdfSource};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: dump_blocks <pdf_path> [max_page | min-max]");
        std::process::exit(1);
    }

    let source = match LopdfSource::open(&args[1]) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let page_count = source.page_count();
    let range = args.get(2).map(|s| s.as_str()).unwrap_or("1-3");
    let (min_page, max_page) = if let Some((a, b)) = range.split_once('-') {
        (a.parse().unwrap_or(1), b.parse().unwrap_or(3))
    } else {
        (1, range.parse().unwrap_or(3))
    };

    for page in min_page..=max_page.min(page_count) {
        let layout = match source.page_layout(page) {
            Ok(layout) => layout,
            Err(e) => {
                println!("=== PAGE {} (error: {}) ===", page, e);
                println!();
                continue;
            }
        };

        let mut blocks: Vec<&ContentBlock> = layout.blocks.iter().collect();
        blocks.sort_by(|a, b| a.bbox().y0.total_cmp(&b.bbox().y0));

        println!(
            "=== PAGE {} ({} blocks, {} placements) ===",
            page,
            blocks.len(),
            layout.placements.len()
        );
        for block in blocks {
            let b = block.bbox();
            match block {
                ContentBlock::Text { lines, .. } => {
                    println!(
                        "  TEXT  y0={:7.1} y1={:7.1} x0={:7.1} x1={:7.1} lines={}",
                        b.y0,
                        b.y1,
                        b.x0,
                        b.x1,
                        lines.len()
                    );
                    for line in lines {
                        let (font, fs) = line
                            .spans
                            .first()
                            .map(|s| (s.font.as_str(), s.font_size))
                            .unwrap_or(("-", 0.0));
                        println!("        font={:<8} fs={:5.1} text={:?}", font, fs, line.text());
                    }
                }
                ContentBlock::Image { .. } => {
                    println!(
                        "  IMAGE y0={:7.1} y1={:7.1} x0={:7.1} x1={:7.1} cy={:7.1}",
                        b.y0,
                        b.y1,
                        b.x0,
                        b.x1,
                        b.center_y()
                    );
                }
            }
        }
        for p in &layout.placements {
            let xref = p.xref.map(|x| x.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "  PLACE y0={:7.1} y1={:7.1} cy={:7.1} xref={}",
                p.bbox.y0,
                p.bbox.y1,
                p.bbox.center_y(),
                xref
            );
        }
        println!();
    }
}
