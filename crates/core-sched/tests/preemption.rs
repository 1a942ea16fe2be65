//! Interactive work must preempt bulk highlighting.
//!
//! Models the situation where a long initial highlight scan is running and
//! the user types into the search entry: the very next dispatch has to run
//! the incremental search step, not the next highlight slice.

use std::time::Duration;

use core_highlight::{FormatSpec, Highlighter, ScanStep};
use core_sched::{Priority, Scheduler, TaskId};
use core_search::SearchPar;
use core_text::Document;

struct Ctx {
    doc: Document,
    higl: Highlighter,
    order: Vec<&'static str>,
    rearm_high_init: bool,
}

fn high_init_step(ctx: &mut Ctx) {
    ctx.order.push("highlight");
    // a tiny budget guarantees the scan cannot finish in one slice
    match ctx.higl.init_step_with_budget(&ctx.doc, Duration::ZERO) {
        ScanStep::Continue { .. } => ctx.rearm_high_init = true,
        ScanStep::Done => ctx.rearm_high_init = false,
    }
}

fn arm_high_init(sched: &mut Scheduler<Ctx>, task: TaskId) {
    sched.start(task, high_init_step);
}

#[test]
fn incremental_search_preempts_highlight_init() {
    let text = vec!["match me"; 10_000].join("\n");
    let mut ctx = Ctx {
        doc: Document::from_str(&text),
        higl: Highlighter::new(),
        order: Vec::new(),
        rearm_high_init: false,
    };
    ctx.higl.add_pattern(
        SearchPar::new("match", false, true),
        FormatSpec::with_bg(0x123456),
        None,
    );
    ctx.higl.start_init_scan();

    let mut sched: Scheduler<Ctx> = Scheduler::new();
    let high_init = sched.register(Priority::HighlightInit);
    let search_inc = sched.register(Priority::SearchInc);

    arm_high_init(&mut sched, high_init);

    // let the highlight scan make some progress
    for _ in 0..3 {
        assert!(sched.dispatch(&mut ctx));
        assert!(ctx.rearm_high_init, "scan must still be in flight");
        arm_high_init(&mut sched, high_init);
    }
    assert_eq!(ctx.order, vec!["highlight"; 3]);

    // the user types a character: the incremental search step is queued
    // behind the already pending highlight slice
    sched.start(search_inc, |ctx: &mut Ctx| ctx.order.push("inc-search"));

    assert!(sched.dispatch(&mut ctx));
    assert_eq!(
        ctx.order.last(),
        Some(&"inc-search"),
        "SEARCH_INC must run before the next HIGHLIGHT_INIT slice"
    );

    // with the interactive task drained, highlighting resumes
    assert!(sched.dispatch(&mut ctx));
    assert_eq!(ctx.order.last(), Some(&"highlight"));
}

#[test]
fn hall_scan_outranks_init_scan() {
    let mut ctx = Ctx {
        doc: Document::from_str("x"),
        higl: Highlighter::new(),
        order: Vec::new(),
        rearm_high_init: false,
    };
    let mut sched: Scheduler<Ctx> = Scheduler::new();
    let high_init = sched.register(Priority::HighlightInit);
    let hall = sched.register(Priority::HighlightSearch);

    sched.start(high_init, |ctx: &mut Ctx| ctx.order.push("init"));
    sched.start(hall, |ctx: &mut Ctx| ctx.order.push("hall"));

    sched.dispatch(&mut ctx);
    sched.dispatch(&mut ctx);
    assert_eq!(ctx.order, vec!["hall", "init"]);
}
