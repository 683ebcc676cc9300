use pagelift::config::{Config, Settings};
use pagelift::dom::{Document, NodeId};
use pagelift::early;
use pagelift::geometry::{Rect, Viewport};
use pagelift::images::{FallbackOutcome, ORIGINAL_SRC_ATTR};
use pagelift::marks::{self, Mark};
use pagelift::perf::{CollectingSink, PerformanceReport, ResourceTiming, StaticTimings};
use pagelift::scheduler::IdleDeadline;
use pagelift::serialize;
use pagelift::session::Session;
use pagelift::visibility::VIEWPORT_CLASS;
use pagelift::worker::ClassifierWorker;

// ── Test Fixtures ───────────────────────────────────────────────────────────

const NEWS: &str = include_str!("fixtures/news.html");
const GALLERY: &str = include_str!("fixtures/gallery.html");
const LANDING: &str = include_str!("fixtures/landing.html");

const NEWS_URL: &str = "https://www.dailyledger.com/";

fn session_for(html: &str, url: &str) -> Session {
    session_with(html, url, Settings::default())
}

fn session_with(html: &str, url: &str, settings: Settings) -> Session {
    let doc = Document::parse(html, Some(url));
    Session::new(doc, settings, Viewport::new(1280.0, 800.0)).unwrap()
}

/// Enable and run passes until nothing is pending.
fn settled(html: &str, url: &str) -> Session {
    let mut s = session_for(html, url);
    s.enable(0);
    s.settle(0);
    s
}

fn node(s: &Session, id: &str) -> NodeId {
    s.document()
        .find_by_id(id)
        .unwrap_or_else(|| panic!("fixture has no #{id}"))
}

fn attr<'a>(s: &'a Session, id: &str, name: &str) -> Option<&'a str> {
    s.document().attr(node(s, id), name)
}

fn links_with_rel(doc: &Document, rel: &str) -> Vec<String> {
    doc.elements()
        .into_iter()
        .filter(|&n| doc.tag(n) == Some("link") && doc.attr(n, "rel") == Some(rel))
        .filter_map(|n| doc.attr(n, "href").map(str::to_string))
        .collect()
}

fn all_marks(doc: &Document) -> Vec<(NodeId, Mark)> {
    doc.elements()
        .into_iter()
        .flat_map(|n| marks::marks_on(doc, n).into_iter().map(move |m| (n, m)))
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════
// PASS IDEMPOTENCE AND MARKS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn second_pass_on_unchanged_document_is_a_no_op() {
    let mut s = settled(NEWS, NEWS_URL);
    let rev = s.document().revision();
    let html = serialize::to_html(s.document());

    let report = s.run_pass(10).unwrap();
    assert!(!report.mutated(), "report: {report:?}");
    assert_eq!(s.document().revision(), rev);
    assert_eq!(serialize::to_html(s.document()), html);
}

#[test]
fn settle_converges_quickly() {
    let mut s = session_for(NEWS, NEWS_URL);
    s.enable(0);
    let reports = s.settle(0);
    assert!(reports.len() <= 3, "took {} passes", reports.len());
    assert!(reports.iter().all(|r| r.failed_rules.is_empty()));
    assert!(s.scheduler().is_idle());
}

#[test]
fn marks_are_never_cleared() {
    let mut s = settled(NEWS, NEWS_URL);
    let before = all_marks(s.document());
    assert!(!before.is_empty());

    // Host churn: new content, class flips, a scroll, more passes.
    let main = node(&s, "main");
    let doc = s.document_mut();
    let p = doc.create_element("p");
    doc.append_child(main, p).unwrap();
    doc.add_class(main, "theme-dark").unwrap();
    s.notify_mutations(50);
    s.settle(50);
    s.set_viewport(Viewport::new(1280.0, 800.0).scrolled_to(4000.0)).unwrap();
    s.run_pass(60);

    let after = all_marks(s.document());
    for entry in &before {
        assert!(after.contains(entry), "mark lost: {entry:?}");
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// IMAGE RULES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn remote_image_is_lazy_with_synthesized_srcset() {
    let s = settled(NEWS, NEWS_URL);
    let src = "https://img.ledgercdn.net/harbor.jpg";
    assert_eq!(attr(&s, "hero", "loading"), Some("lazy"));
    assert_eq!(attr(&s, "hero", "decoding"), Some("async"));
    assert_eq!(attr(&s, "hero", ORIGINAL_SRC_ATTR), Some(src));
    assert_eq!(
        attr(&s, "hero", "srcset"),
        Some(format!("{src} 1x, {src} 2x").as_str())
    );
    assert_eq!(
        attr(&s, "hero", "sizes"),
        Some("(max-width: 768px) 100vw, (max-width: 1200px) 50vw, 33vw")
    );
    assert_eq!(attr(&s, "hero", "fetchpriority"), Some("low"));
    assert!(marks::is_marked(s.document(), node(&s, "hero"), Mark::ErrorHandlerAttached));
}

#[test]
fn relative_image_resolves_against_page_url() {
    let s = settled(NEWS, NEWS_URL);
    assert_eq!(
        attr(&s, "local", ORIGINAL_SRC_ATTR),
        Some("https://www.dailyledger.com/media/map.png")
    );
    assert_eq!(attr(&s, "local", "src"), Some("/media/map.png"));
}

#[test]
fn svg_placeholder_is_swapped_for_deferred_source() {
    let s = settled(NEWS, NEWS_URL);
    let img = node(&s, "placeholder");
    assert_eq!(attr(&s, "placeholder", "src"), Some("https://img.ledgercdn.net/crane.jpg"));
    assert!(marks::is_marked(s.document(), img, Mark::ImageOptimized));
    assert_eq!(attr(&s, "placeholder", "loading"), None);
    assert_eq!(attr(&s, "placeholder", "srcset"), None);
}

#[test]
fn non_ascii_image_path_is_optimized() {
    let html = r#"<html><body><img id="cafe" src="/images/photo-café.jpg"></body></html>"#;
    let s = settled(html, "https://site.example.com/");
    let img = node(&s, "cafe");
    assert!(marks::is_marked(s.document(), img, Mark::ImageOptimized));
    assert_eq!(attr(&s, "cafe", "loading"), Some("lazy"));
    assert_eq!(attr(&s, "cafe", "src"), Some("/images/photo-café.jpg"));
}

#[test]
fn placeholder_reverts_once_on_load_failure() {
    let mut s = settled(NEWS, NEWS_URL);
    let img = node(&s, "placeholder");
    let outcome = s.report_image_error(img).unwrap().unwrap();
    assert!(matches!(outcome, FallbackOutcome::Retried(ref src) if src.starts_with("data:image/svg+xml")));
    assert_eq!(s.report_image_error(img).unwrap(), Some(FallbackOutcome::Exhausted));
}

#[test]
fn lazy_library_images_are_only_marked() {
    let s = settled(NEWS, NEWS_URL);
    let img = node(&s, "library");
    assert!(marks::is_marked(s.document(), img, Mark::ImageOptimized));
    assert_eq!(attr(&s, "library", "src"), Some("https://img.ledgercdn.net/dock.jpg"));
    assert_eq!(attr(&s, "library", "loading"), None);
    assert_eq!(attr(&s, "library", "srcset"), None);
    assert_eq!(attr(&s, "library", ORIGINAL_SRC_ATTR), None);
}

#[test]
fn in_viewport_image_gets_high_priority() {
    let mut s = session_for(NEWS, NEWS_URL);
    let hero = node(&s, "hero");
    s.document_mut().set_layout(hero, Rect::new(0.0, 120.0, 800.0, 400.0));
    s.enable(0);
    s.settle(0);
    assert_eq!(attr(&s, "hero", "fetchpriority"), Some("high"));
}

#[test]
fn fallback_chain_walks_deferred_then_smallest_candidate() {
    let mut s = settled(LANDING, "https://launch.example.com/");
    let img = node(&s, "broken");
    assert_eq!(
        s.report_image_error(img).unwrap(),
        Some(FallbackOutcome::Retried("https://media.example/launch@2x.jpg".into()))
    );
    assert_eq!(
        s.report_image_error(img).unwrap(),
        Some(FallbackOutcome::Retried("https://media.example/launch-600.jpg".into()))
    );
    assert_eq!(s.report_image_error(img).unwrap(), Some(FallbackOutcome::Exhausted));
    assert_eq!(s.report_image_error(img).unwrap(), Some(FallbackOutcome::Exhausted));
    assert_eq!(attr(&s, "broken", "src"), Some("https://media.example/launch-600.jpg"));
}

// ═══════════════════════════════════════════════════════════════════════════
// SCRIPTS AND RESOURCE HINTS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn blocking_scripts_are_deferred() {
    let s = settled(NEWS, NEWS_URL);
    let doc = s.document();
    let scripts: Vec<_> = doc
        .elements()
        .into_iter()
        .filter(|&n| doc.tag(n) == Some("script"))
        .collect();
    assert_eq!(scripts.len(), 2);
    let app = scripts[0];
    let analytics = scripts[1];
    assert_eq!(doc.attr(app, "defer"), Some(""));
    assert!(marks::is_marked(doc, app, Mark::ScriptDeferred));
    assert!(doc.has_attr(analytics, "async"));
    assert!(!doc.has_attr(analytics, "defer"));
}

#[test]
fn one_cdn_gets_exactly_one_hint_pair() {
    let s = settled(GALLERY, "https://gallery.example.com/");
    let doc = s.document();
    assert_eq!(links_with_rel(doc, "preconnect"), vec!["https://cdn.pixhost.example"]);
    assert_eq!(links_with_rel(doc, "dns-prefetch"), vec!["https://cdn.pixhost.example"]);

    let preconnect = doc
        .elements()
        .into_iter()
        .find(|&n| doc.attr(n, "rel") == Some("preconnect"))
        .unwrap();
    assert_eq!(doc.attr(preconnect, "crossorigin"), Some("anonymous"));

    let hinted = doc
        .elements()
        .into_iter()
        .filter(|&n| marks::is_marked(doc, n, Mark::HintProcessed))
        .count();
    assert_eq!(hinted, 7);
}

#[test]
fn own_origin_and_existing_hints_are_not_repeated() {
    let s = settled(NEWS, NEWS_URL);
    let preconnects = links_with_rel(s.document(), "preconnect");
    assert_eq!(
        preconnects,
        vec![
            "https://analytics.tracker.io",
            "https://img.ledgercdn.net",
            "https://static.ledgercdn.net",
        ]
    );
    assert!(!preconnects.iter().any(|o| o.contains("dailyledger")));
}

#[test]
fn anchors_prefetch_only_when_visible_and_same_origin() {
    let mut s = session_for(NEWS, NEWS_URL);
    let next = node(&s, "next-story");
    s.document_mut().set_layout(next, Rect::new(20.0, 600.0, 200.0, 20.0));
    s.enable(0);
    s.settle(0);

    let doc = s.document();
    assert_eq!(
        links_with_rel(doc, "prefetch"),
        vec!["https://www.dailyledger.com/business/rates"]
    );
    assert!(marks::is_marked(doc, node(&s, "next-story"), Mark::HintProcessed));
    assert!(marks::is_marked(doc, node(&s, "jump"), Mark::HintProcessed));
    assert!(marks::is_marked(doc, node(&s, "partner"), Mark::HintProcessed));
}

// ═══════════════════════════════════════════════════════════════════════════
// VIEWPORT CONTAINERS
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn containers_tagged_and_frames_wrapped() {
    let s = settled(NEWS, NEWS_URL);
    let doc = s.document();
    for id in ["main", "lead"] {
        assert!(doc.has_class(node(&s, id), VIEWPORT_CLASS), "#{id}");
    }
    let video = node(&s, "video");
    assert_eq!(doc.attr(video, "loading"), Some("lazy"));
    let wrapper = doc.parent(video).unwrap();
    assert_eq!(doc.tag(wrapper), Some("div"));
    assert!(doc.has_class(wrapper, VIEWPORT_CLASS));
    assert!(marks::is_marked(doc, video, Mark::ViewportWrapped));

    let styles = doc
        .elements()
        .into_iter()
        .filter(|&n| doc.attr(n, "data-pagelift") == Some("viewport"))
        .count();
    assert_eq!(styles, 1);
    // main, article, section, iframe wrapper
    assert_eq!(s.intersections().len(), 4);
}

#[test]
fn container_inline_data_uri_survives_toggle() {
    let html = r#"<html><body><section id="band" style="background-image: url(data:image/png;base64,AAAA); color: red"><p>text</p></section></body></html>"#;
    let mut s = session_for(html, "https://site.example.com/");
    let band = node(&s, "band");
    s.document_mut().set_layout(band, Rect::new(0.0, 3000.0, 1280.0, 900.0));
    s.enable(0);
    s.settle(0);
    assert!(s.document().has_class(band, VIEWPORT_CLASS));
    let style = attr(&s, "band", "style").unwrap();
    assert!(style.contains("background-image: url(data:image/png;base64,AAAA)"), "{style}");
    assert!(style.contains("color: red"), "{style}");
    assert!(style.contains("content-visibility: auto;"), "{style}");
}

#[test]
fn scrolling_toggles_render_state_without_new_nodes() {
    let mut s = session_for(NEWS, NEWS_URL);
    let lead = node(&s, "lead");
    s.document_mut().set_layout(lead, Rect::new(0.0, 3000.0, 1280.0, 900.0));
    s.enable(0);
    s.settle(0);
    assert_eq!(
        s.document().inline_style(lead).get("content-visibility"),
        Some("auto")
    );

    let nodes = s.document().elements().len();
    for round in 0..5 {
        let at = 2500.0;
        assert_eq!(s.set_viewport(Viewport::new(1280.0, 800.0).scrolled_to(at)).unwrap(), 1);
        assert_eq!(
            s.document().inline_style(lead).get("content-visibility"),
            Some("visible"),
            "round {round}"
        );
        assert_eq!(s.set_viewport(Viewport::new(1280.0, 800.0)).unwrap(), 1);
        assert_eq!(
            s.document().inline_style(lead).get("content-visibility"),
            Some("auto"),
            "round {round}"
        );
        s.settle(round * 10);
    }
    assert_eq!(s.document().elements().len(), nodes);
}

// ═══════════════════════════════════════════════════════════════════════════
// REVEAL RULES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn menus_stay_hidden() {
    let s = settled(NEWS, NEWS_URL);
    let doc = s.document();
    let nav = node(&s, "primary-nav");
    assert_eq!(doc.inline_style(nav).get("display"), Some("none"));
    assert!(!marks::is_marked(doc, nav, Mark::Revealed));
    let modal = node(&s, "signup");
    assert_eq!(doc.inline_style(modal).get("display"), Some("none"));
}

#[test]
fn animated_teaser_is_revealed_but_accordion_is_not() {
    let s = settled(NEWS, NEWS_URL);
    let doc = s.document();
    let teaser = doc.inline_style(node(&s, "teaser"));
    assert_eq!(teaser.get("opacity"), Some("1"));
    assert_eq!(teaser.get("visibility"), Some("visible"));
    assert_eq!(teaser.get("display"), Some("block"));
    let accordion = node(&s, "accordion");
    assert_eq!(doc.inline_style(accordion).get("display"), Some("none"));
    assert!(!marks::is_marked(doc, accordion, Mark::Revealed));
}

#[test]
fn transforms_and_clips_are_neutralized() {
    let s = settled(LANDING, "https://launch.example.com/");
    let doc = s.document();
    for id in ["title", "subtitle"] {
        let style = doc.inline_style(node(&s, id));
        assert_eq!(style.get("transform"), Some("none"), "#{id}");
        assert_eq!(style.get("clip-path"), Some("none"), "#{id}");
        assert!(marks::is_marked(doc, node(&s, id), Mark::Revealed));
    }
    let cta = node(&s, "cta");
    assert!(!doc.has_attr(cta, "hidden"));
    assert_eq!(doc.inline_style(cta).get("display"), Some("block"));

    for id in ["tooltip", "drawer"] {
        assert!(!marks::is_marked(doc, node(&s, id), Mark::Revealed), "#{id}");
    }
}

#[test]
fn reveal_switch_turns_both_rules_off() {
    let settings = Settings {
        reveal_hidden: false,
        ..Settings::default()
    };
    let mut s = session_with(LANDING, "https://launch.example.com/", settings);
    s.enable(0);
    s.settle(0);
    let doc = s.document();
    assert!(doc.has_attr(node(&s, "cta"), "hidden"));
    assert_eq!(
        doc.inline_style(node(&s, "title")).get("transform"),
        Some("translateY(120vh)")
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULING AND LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn injected_content_is_picked_up_on_idle() {
    let mut s = settled(NEWS, NEWS_URL);
    let main = node(&s, "main");
    let doc = s.document_mut();
    let img = doc.create_element("img");
    doc.set_attr(img, "src", "https://img.ledgercdn.net/late.jpg").unwrap();
    doc.append_child(main, img).unwrap();

    assert!(s.tick(100, None).is_none());
    let report = s.tick(120, Some(IdleDeadline::idle(8.0))).unwrap();
    assert_eq!(report.images.optimized, 1);
    assert_eq!(s.document().attr(img, "loading"), Some("lazy"));
}

#[test]
fn disable_releases_everything_until_reenabled() {
    let mut s = settled(NEWS, NEWS_URL);
    let lead = node(&s, "lead");
    let hero = node(&s, "hero");
    s.document_mut().set_layout(lead, Rect::new(0.0, 3000.0, 1280.0, 900.0));
    s.disable();

    assert_eq!(s.document().observer_count(), 0);
    assert!(s.intersections().is_empty());
    assert!(s.scheduler().is_idle());

    let rev = s.document().revision();
    let main = node(&s, "main");
    let doc = s.document_mut();
    let img = doc.create_element("img");
    doc.set_attr(img, "src", "https://img.ledgercdn.net/late.jpg").unwrap();
    doc.append_child(main, img).unwrap();
    let after_host_edit = s.document().revision();
    assert!(after_host_edit > rev);

    assert!(!s.notify_mutations(100));
    assert!(s.tick(5000, Some(IdleDeadline::idle(50.0))).is_none());
    assert_eq!(s.set_viewport(Viewport::new(1280.0, 800.0).scrolled_to(2500.0)).unwrap(), 0);
    assert_eq!(s.report_image_error(hero).unwrap(), None);
    assert_eq!(s.document().revision(), after_host_edit);
    assert!(!marks::is_marked(s.document(), img, Mark::ImageOptimized));

    s.enable(6000);
    s.settle(6000);
    assert!(marks::is_marked(s.document(), img, Mark::ImageOptimized));
    assert_eq!(s.document().observer_count(), 1);
    assert!(!s.intersections().is_empty());
}

#[test]
fn missing_observer_support_leaves_page_untouched() {
    let mut doc = Document::parse(NEWS, Some(NEWS_URL));
    doc.set_observers_supported(false);
    let html = serialize::to_html(&doc);
    let mut s = Session::new(doc, Settings::default(), Viewport::default()).unwrap();
    s.enable(0);
    assert!(s.is_degraded());
    assert!(s.settle(0).is_empty());
    assert_eq!(serialize::to_html(s.document()), html);
}

#[test]
fn performance_report_forwarded_once() {
    let mut s = settled(NEWS, NEWS_URL);
    let mut report = PerformanceReport::default();
    report.paint.insert("first-contentful-paint".into(), 412.0);
    report.resources.push(ResourceTiming {
        name: "https://img.ledgercdn.net/harbor.jpg".into(),
        duration: 88.5,
        transfer_size: 48_213,
    });
    let source = StaticTimings(report.clone());
    let mut sink = CollectingSink::default();
    assert!(s.on_load(&source, &mut sink).unwrap());
    assert!(!s.on_load(&source, &mut sink).unwrap());
    assert_eq!(sink.reports, vec![report]);
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER AND EARLY INJECTION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn worker_classification_matches_inline() {
    let settings = Settings::default();
    let worker = ClassifierWorker::spawn(settings.heuristics.responsive_sizes.clone(), 2);

    let mut offloaded = session_for(NEWS, NEWS_URL);
    offloaded.enable(0);
    offloaded.run_pass_with_worker(0, &worker).await.unwrap();
    offloaded.settle(0);

    let inline = settled(NEWS, NEWS_URL);
    assert_eq!(
        serialize::to_html(offloaded.document()),
        serialize::to_html(inline.document())
    );
    worker.shutdown().await.unwrap();
}

#[test]
fn early_injection_follows_config() {
    let mut doc = Document::parse(NEWS, Some(NEWS_URL));
    let stats = early::apply(&mut doc, &Config::default()).unwrap();
    assert!(stats.style_injected);
    assert_eq!(stats.preloads_downgraded, 1);
    assert_eq!(links_with_rel(&doc, "prefetch"), vec!["/fonts/serif.woff2"]);
    assert_eq!(links_with_rel(&doc, "preload"), vec!["/css/critical.css"]);

    let mut doc = Document::parse(NEWS, Some(NEWS_URL));
    let stats = early::apply(&mut doc, &Config::all_disabled()).unwrap();
    assert!(!stats.style_injected);
    assert_eq!(stats.preloads_downgraded, 0);
}

#[test]
fn settings_file_drives_the_session() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("settings.json");
    std::fs::write(&path, r#"{"reveal_hidden": false, "config": {"preload": true}}"#).unwrap();
    let settings = Settings::load(&path).unwrap();
    assert!(!settings.reveal_hidden);
    assert!(!settings.config.lazy_load);

    let mut s = session_with(NEWS, NEWS_URL, settings);
    s.enable(0);
    s.settle(0);
    assert!(!marks::is_marked(s.document(), node(&s, "teaser"), Mark::Revealed));
}
