/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that fires user-registered (and logging) handlers for the events a base publishes.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

pub(crate) struct EventHandlers {
    pub(crate) append_handlers: Vec<HandlerPtr<AppendEvent>>,
    pub(crate) apply_handlers: Vec<HandlerPtr<ApplyEvent>>,
    pub(crate) truncate_handlers: Vec<HandlerPtr<TruncateEvent>>,
    pub(crate) index_handlers: Vec<HandlerPtr<IndexEvent>>,
    pub(crate) sign_handlers: Vec<HandlerPtr<SignEvent>>,
    pub(crate) add_writer_handlers: Vec<HandlerPtr<AddWriterEvent>>,
    pub(crate) remove_writer_handlers: Vec<HandlerPtr<RemoveWriterEvent>>,
    pub(crate) update_indexers_handlers: Vec<HandlerPtr<UpdateIndexersEvent>>,
    pub(crate) start_fast_forward_handlers: Vec<HandlerPtr<StartFastForwardEvent>>,
    pub(crate) end_fast_forward_handlers: Vec<HandlerPtr<EndFastForwardEvent>>,
    pub(crate) interrupt_handlers: Vec<HandlerPtr<InterruptEvent>>,
    pub(crate) error_handlers: Vec<HandlerPtr<ErrorEvent>>,
}

/// Push `handler` (if any) and, if `log` is set, the default logger of `T` into `handlers`.
fn handlers_for<T: Logger>(log: bool, handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log {
        handlers.push(T::get_logger());
    }
    if let Some(handler) = handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        append_handler: Option<HandlerPtr<AppendEvent>>,
        apply_handler: Option<HandlerPtr<ApplyEvent>>,
        truncate_handler: Option<HandlerPtr<TruncateEvent>>,
        index_handler: Option<HandlerPtr<IndexEvent>>,
        sign_handler: Option<HandlerPtr<SignEvent>>,
        add_writer_handler: Option<HandlerPtr<AddWriterEvent>>,
        remove_writer_handler: Option<HandlerPtr<RemoveWriterEvent>>,
        update_indexers_handler: Option<HandlerPtr<UpdateIndexersEvent>>,
        start_fast_forward_handler: Option<HandlerPtr<StartFastForwardEvent>>,
        end_fast_forward_handler: Option<HandlerPtr<EndFastForwardEvent>>,
        interrupt_handler: Option<HandlerPtr<InterruptEvent>>,
        error_handler: Option<HandlerPtr<ErrorEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            append_handlers: handlers_for(log_events, append_handler),
            apply_handlers: handlers_for(log_events, apply_handler),
            truncate_handlers: handlers_for(log_events, truncate_handler),
            index_handlers: handlers_for(log_events, index_handler),
            sign_handlers: handlers_for(log_events, sign_handler),
            add_writer_handlers: handlers_for(log_events, add_writer_handler),
            remove_writer_handlers: handlers_for(log_events, remove_writer_handler),
            update_indexers_handlers: handlers_for(log_events, update_indexers_handler),
            start_fast_forward_handlers: handlers_for(log_events, start_fast_forward_handler),
            end_fast_forward_handlers: handlers_for(log_events, end_fast_forward_handler),
            interrupt_handlers: handlers_for(log_events, interrupt_handler),
            error_handlers: handlers_for(log_events, error_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.append_handlers.is_empty()
            && self.apply_handlers.is_empty()
            && self.truncate_handlers.is_empty()
            && self.index_handlers.is_empty()
            && self.sign_handlers.is_empty()
            && self.add_writer_handlers.is_empty()
            && self.remove_writer_handlers.is_empty()
            && self.update_indexers_handlers.is_empty()
            && self.start_fast_forward_handlers.is_empty()
            && self.end_fast_forward_handlers.is_empty()
            && self.interrupt_handlers.is_empty()
            && self.error_handlers.is_empty()
    }

    pub fn fire_handlers(&self, event: Event) {
        match event {
            Event::Append(append_event) => self
                .append_handlers
                .iter()
                .for_each(|handler| handler(&append_event)),

            Event::Apply(apply_event) => self
                .apply_handlers
                .iter()
                .for_each(|handler| handler(&apply_event)),

            Event::Truncate(truncate_event) => self
                .truncate_handlers
                .iter()
                .for_each(|handler| handler(&truncate_event)),

            Event::Index(index_event) => self
                .index_handlers
                .iter()
                .for_each(|handler| handler(&index_event)),

            Event::Sign(sign_event) => self
                .sign_handlers
                .iter()
                .for_each(|handler| handler(&sign_event)),

            Event::AddWriter(add_writer_event) => self
                .add_writer_handlers
                .iter()
                .for_each(|handler| handler(&add_writer_event)),

            Event::RemoveWriter(remove_writer_event) => self
                .remove_writer_handlers
                .iter()
                .for_each(|handler| handler(&remove_writer_event)),

            Event::UpdateIndexers(update_indexers_event) => self
                .update_indexers_handlers
                .iter()
                .for_each(|handler| handler(&update_indexers_event)),

            Event::StartFastForward(start_fast_forward_event) => self
                .start_fast_forward_handlers
                .iter()
                .for_each(|handler| handler(&start_fast_forward_event)),

            Event::EndFastForward(end_fast_forward_event) => self
                .end_fast_forward_handlers
                .iter()
                .for_each(|handler| handler(&end_fast_forward_event)),

            Event::Interrupt(interrupt_event) => self
                .interrupt_handlers
                .iter()
                .for_each(|handler| handler(&interrupt_event)),

            Event::Error(error_event) => self
                .error_handlers
                .iter()
                .for_each(|handler| handler(&error_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire the handlers of events published before shutdown.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
