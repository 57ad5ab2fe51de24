use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strats_event_bus::{fn_handler, Bar, BusConfig, Event, EventBus, EventTag};

fn market() -> Event {
    Event::market(
        "BTCUSDT",
        Bar {
            timestamp: Utc::now(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 4.2,
        },
    )
}

fn bus_with_handlers(handlers: usize, max_history: usize) -> EventBus {
    let bus = EventBus::new(BusConfig::default().with_max_history(max_history).with_logging(false)).unwrap();
    for i in 0..handlers {
        bus.register_handler(fn_handler(format!("h{i}"), [EventTag::Market], |event| {
            black_box(event.id());
            Ok(())
        }))
        .unwrap();
    }
    bus
}

fn bench_publish(c: &mut Criterion) {
    let no_subscribers = bus_with_handlers(0, 0);
    c.bench_function("publish_no_subscribers", |b| {
        b.iter(|| no_subscribers.publish(black_box(market())))
    });

    let four = bus_with_handlers(4, 0);
    c.bench_function("publish_4_handlers", |b| b.iter(|| four.publish(black_box(market()))));

    let with_history = bus_with_handlers(4, 10_000);
    c.bench_function("publish_4_handlers_history", |b| {
        b.iter(|| with_history.publish(black_box(market())))
    });
}

criterion_group!(benches, bench_publish);
criterion_main!(benches);
