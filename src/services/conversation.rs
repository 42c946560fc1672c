use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Weekday};
use tracing::Instrument;
use uuid::Uuid;

use crate::errors::FlowError;
use crate::models::slot::distinct_slots;
use crate::models::{
    CustomerIdentity, Intent, OrderId, Period, ServiceOrder, Session, SlotConstraints, Suggestion,
};
use crate::services::ai::local;
use crate::services::ai::nlu::LanguageUnderstanding;
use crate::services::booking::{BookingCommitter, BookingError, CommitOutcome};
use crate::services::scheduling::SchedulingService;
use crate::services::session_store::SessionStore;

/// What the assistant answers; rendered to Portuguese by `Display`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Welcome,
    AskCpf,
    InvalidCpf,
    CustomerNotFound,
    Greeting { name: String },
    NoOrders,
    OrderList { orders: Vec<ServiceOrder> },
    OrderStatus { orders: Vec<ServiceOrder> },
    WhichOrder { orders: Vec<ServiceOrder> },
    Proposal {
        order_id: OrderId,
        date: NaiveDate,
        period: Period,
        alternatives: Vec<(NaiveDate, Period)>,
        /// Set when the customer's own date/period had no room.
        missed: Option<SlotConstraints>,
    },
    NoAvailability { order_id: OrderId },
    SlotList { slots: Vec<(NaiveDate, Period)> },
    AskPeriod { date: NaiveDate, periods: Vec<Period> },
    AskDate {
        period: Option<Period>,
        options: Vec<(NaiveDate, Period)>,
    },
    DateNotUnderstood,
    PeriodNotUnderstood,
    Noted {
        date: Option<NaiveDate>,
        period: Option<Period>,
    },
    ConfirmPrompt {
        order_id: OrderId,
        date: NaiveDate,
        period: Period,
    },
    SlotUnavailable {
        date: NaiveDate,
        period: Period,
        alternatives: Vec<(NaiveDate, Period)>,
    },
    Booked {
        order_id: OrderId,
        date: NaiveDate,
        period: Period,
        message: Option<String>,
    },
    SlotTaken { date: NaiveDate, period: Period },
    CommitRejected { message: Option<String> },
    Cancelled,
    Nudge {
        order_id: OrderId,
        date: Option<NaiveDate>,
        period: Option<Period>,
        awaiting: bool,
    },
    Goodbye { name: String },
    Text(String),
    TryAgain,
    Apology,
    Multi(Vec<Reply>),
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

fn fmt_date(date: NaiveDate) -> String {
    format!("{}, {}", weekday_name(date.weekday()), date.format("%d/%m"))
}

fn fmt_slot(date: NaiveDate, period: Period) -> String {
    format!("{} ({})", fmt_date(date), period.label())
}

fn write_slots(f: &mut fmt::Formatter<'_>, slots: &[(NaiveDate, Period)]) -> fmt::Result {
    for (date, period) in slots {
        write!(f, "\n• {}", fmt_slot(*date, *period))?;
    }
    Ok(())
}

fn write_orders(f: &mut fmt::Formatter<'_>, orders: &[ServiceOrder], with_status: bool) -> fmt::Result {
    for (i, order) in orders.iter().enumerate() {
        write!(f, "\n{}. {}", i + 1, order.short_label())?;
        if with_status {
            write!(f, ": {}", order.status.label())?;
            if let (Some(date), Some(period)) = (order.scheduled_date, order.scheduled_period) {
                write!(f, ", visita em {}", fmt_slot(date, period))?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Welcome => write!(
                f,
                "Olá! Sou o assistente de agendamento de visitas técnicas. \
                 Para começar, me informe o CPF do titular do contrato."
            ),
            Reply::AskCpf => write!(f, "Para continuar, preciso do CPF do titular do contrato."),
            Reply::InvalidCpf => write!(
                f,
                "Não consegui validar esse CPF. Pode enviar novamente os 11 dígitos?"
            ),
            Reply::CustomerNotFound => write!(
                f,
                "Não encontrei nenhum cadastro com esse CPF. Confira os números e envie de novo."
            ),
            Reply::Greeting { name } => write!(f, "Olá, {name}!"),
            Reply::NoOrders => write!(
                f,
                "Não encontrei ordens de serviço abertas ou agendadas no seu cadastro."
            ),
            Reply::OrderList { orders } => {
                write!(f, "Estas são as suas ordens de serviço:")?;
                write_orders(f, orders, false)?;
                write!(f, "\n\nQual delas você quer agendar?")
            }
            Reply::OrderStatus { orders } => {
                write!(f, "Situação das suas ordens de serviço:")?;
                write_orders(f, orders, true)
            }
            Reply::WhichOrder { orders } => {
                write!(f, "Qual ordem de serviço você quer agendar?")?;
                write_orders(f, orders, false)?;
                write!(f, "\n\nResponda com o número da OS ou a posição na lista.")
            }
            Reply::Proposal {
                order_id,
                date,
                period,
                alternatives,
                missed,
            } => {
                if let Some(missed) = missed {
                    match (missed.date, missed.period) {
                        (Some(d), Some(p)) => {
                            write!(f, "Não há vaga em {}. ", fmt_slot(d, p))?
                        }
                        (Some(d), None) => write!(f, "Não há vaga em {}. ", fmt_date(d))?,
                        (None, Some(p)) => write!(f, "Não há vaga no período da {p}. ")?,
                        (None, None) => {}
                    }
                }
                write!(
                    f,
                    "Para a OS {order_id}, o horário sugerido é {}. Posso confirmar?",
                    fmt_slot(*date, *period)
                )?;
                if !alternatives.is_empty() {
                    write!(f, "\n\nOutras opções:")?;
                    write_slots(f, alternatives)?;
                }
                Ok(())
            }
            Reply::NoAvailability { order_id } => write!(
                f,
                "No momento não há horários disponíveis para a OS {order_id} dentro do prazo. \
                 Nossa equipe vai entrar em contato para combinar a visita."
            ),
            Reply::SlotList { slots } => {
                if slots.is_empty() {
                    return write!(f, "Não encontrei horários com essa preferência.");
                }
                write!(f, "Horários disponíveis:")?;
                write_slots(f, slots)?;
                write!(f, "\n\nQual data e período você prefere?")
            }
            Reply::AskPeriod { date, periods } => {
                write!(f, "Anotei {}. Prefere manhã ou tarde?", fmt_date(*date))?;
                if let [only] = periods.as_slice() {
                    write!(f, " Nessa data há vaga somente à {only}.")?;
                }
                Ok(())
            }
            Reply::AskDate { period, options } => {
                match period {
                    Some(p) => write!(f, "Anotei o período da {p}. Para qual data?")?,
                    None => write!(f, "Sem problema! Para qual data e período você prefere?")?,
                }
                if !options.is_empty() {
                    write!(f, "\n\nAlgumas opções:")?;
                    write_slots(f, options)?;
                }
                Ok(())
            }
            Reply::DateNotUnderstood => write!(
                f,
                "Não entendi a data. Pode informar no formato dia/mês, por exemplo 25/06?"
            ),
            Reply::PeriodNotUnderstood => write!(f, "Você prefere manhã ou tarde?"),
            Reply::Noted { date, period } => match (date, period) {
                (Some(d), Some(p)) => write!(f, "Anotei {}.", fmt_slot(*d, *p)),
                (Some(d), None) => write!(f, "Anotei {}.", fmt_date(*d)),
                (None, Some(p)) => write!(f, "Anotei o período da {p}."),
                (None, None) => Ok(()),
            },
            Reply::ConfirmPrompt {
                order_id,
                date,
                period,
            } => write!(
                f,
                "Confirma a visita técnica da OS {order_id} em {} no período da {period}? \
                 Responda sim para confirmar.",
                fmt_date(*date)
            ),
            Reply::SlotUnavailable {
                date,
                period,
                alternatives,
            } => {
                write!(f, "Não há vaga em {}.", fmt_slot(*date, *period))?;
                if alternatives.is_empty() {
                    write!(f, " Também não encontrei outros horários dentro do prazo.")
                } else {
                    write!(f, " Opções disponíveis:")?;
                    write_slots(f, alternatives)
                }
            }
            Reply::Booked {
                order_id,
                date,
                period,
                message,
            } => {
                write!(
                    f,
                    "Pronto! A visita da OS {order_id} está agendada para {} no período da {period}.",
                    fmt_date(*date)
                )?;
                if let Some(m) = message.as_deref().filter(|m| !m.is_empty()) {
                    write!(f, "\n{m}")?;
                }
                Ok(())
            }
            Reply::SlotTaken { date, period } => write!(
                f,
                "O horário de {} acabou de ser ocupado.",
                fmt_slot(*date, *period)
            ),
            Reply::CommitRejected { message } => match message.as_deref() {
                Some(m) if !m.is_empty() => write!(f, "Não foi possível agendar: {m}"),
                _ => write!(
                    f,
                    "Não foi possível agendar essa OS agora. Tente novamente em instantes \
                     ou fale com nosso atendimento."
                ),
            },
            Reply::Cancelled => write!(
                f,
                "Tudo bem, cancelei o agendamento em andamento. Se precisar, é só chamar."
            ),
            Reply::Nudge {
                order_id,
                date,
                period,
                awaiting,
            } => {
                if *awaiting {
                    if let (Some(d), Some(p)) = (date, period) {
                        return write!(
                            f,
                            "Ainda estamos agendando a OS {order_id}. Confirma a visita em {}? \
                             Responda sim ou não.",
                            fmt_slot(*d, *p)
                        );
                    }
                }
                write!(
                    f,
                    "Ainda estamos agendando a OS {order_id}. Qual data e período você prefere?"
                )
            }
            Reply::Goodbye { name } => write!(
                f,
                "Obrigado pelo contato, {name}! Se precisar de algo mais, estou por aqui."
            ),
            Reply::Text(text) => f.write_str(text),
            Reply::TryAgain => write!(
                f,
                "Estou com dificuldade para consultar o sistema agora. \
                 Pode tentar novamente em alguns instantes?"
            ),
            Reply::Apology => write!(
                f,
                "Desculpe, algo deu errado do nosso lado. Pode repetir a última mensagem?"
            ),
            Reply::Multi(parts) => {
                let mut first = true;
                for part in parts {
                    let text = part.to_string();
                    if text.is_empty() {
                        continue;
                    }
                    if !first {
                        f.write_str("\n\n")?;
                    }
                    f.write_str(&text)?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

type Step = Result<(Session, Reply), FlowError>;

/// Per-phone conversation driver: load session, detect intent, transition, save.
pub struct ConversationEngine {
    sessions: Arc<SessionStore>,
    scheduling: Arc<SchedulingService>,
    nlu: Arc<dyn LanguageUnderstanding>,
    max_listed_slots: usize,
}

impl ConversationEngine {
    pub fn new(
        sessions: Arc<SessionStore>,
        scheduling: Arc<SchedulingService>,
        nlu: Arc<dyn LanguageUnderstanding>,
        max_listed_slots: usize,
    ) -> Self {
        Self {
            sessions,
            scheduling,
            nlu,
            max_listed_slots: max_listed_slots.max(1),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle_message(&self, phone: &str, text: &str) -> String {
        self.handle_message_at(phone, text, Local::now().naive_local())
            .await
    }

    pub async fn handle_message_at(&self, phone: &str, text: &str, now: NaiveDateTime) -> String {
        let span = tracing::info_span!("message", request_id = %Uuid::new_v4(), phone = %phone);
        self.process(phone, text.trim(), now).instrument(span).await
    }

    async fn process(&self, phone: &str, text: &str, now: NaiveDateTime) -> String {
        let guard = self.sessions.lock(phone).await;
        let session = match self.sessions.load_or_new(&guard, now) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = ?e, "failed to load session");
                return Reply::Apology.to_string();
            }
        };

        match self.step(session, text, now).await {
            Ok((mut next, reply)) => {
                next.last_activity = now;
                if let Err(e) = self.sessions.save(&guard, &next) {
                    tracing::error!(error = ?e, "failed to save session");
                    return Reply::Apology.to_string();
                }
                reply.to_string()
            }
            Err(FlowError::External(e)) => {
                tracing::warn!(error = ?e, "external dependency failed, session unchanged");
                Reply::TryAgain.to_string()
            }
            Err(FlowError::Internal(msg)) => {
                tracing::error!(error = %msg, "conversation step failed, session unchanged");
                Reply::Apology.to_string()
            }
        }
    }

    async fn step(&self, mut session: Session, text: &str, now: NaiveDateTime) -> Step {
        let intent = self.detect_intent(&session, text, now.date()).await?;
        tracing::info!(
            intent = intent.as_str(),
            previous = ?session.intent,
            "intent detected"
        );
        session.record_intent(intent);
        self.transition(session, intent, text, now).await
    }

    /// Cheap local readings first; the language model only for the rest.
    async fn detect_intent(
        &self,
        session: &Session,
        text: &str,
        today: NaiveDate,
    ) -> Result<Intent, FlowError> {
        if session.customer.is_none() && local::looks_like_cpf(text) {
            return Ok(Intent::IdentityExtracted);
        }
        if session.awaiting_confirmation && !local::mentions_order(text) {
            let answered = local::is_affirmative(text) || local::is_negative(text);
            let names_slot = local::parse_date(text, today).is_some()
                || local::parse_period(text).is_some();
            if answered && names_slot {
                // "pode ser quinta à tarde" asks for another slot, it does not accept this one
                return Ok(Intent::RequestSchedule);
            }
            if local::is_affirmative(text) {
                return Ok(Intent::ConfirmSchedule);
            }
            if local::is_negative(text) {
                return Ok(Intent::Reschedule);
            }
        }
        Ok(self.nlu.classify_intent(text, &session.summary()).await?)
    }

    pub async fn transition(
        &self,
        session: Session,
        intent: Intent,
        text: &str,
        now: NaiveDateTime,
    ) -> Step {
        match intent {
            Intent::Start => self.on_start(session).await,
            Intent::IdentityExtracted => self.on_identity(session, text, now).await,
            Intent::ListOrders => self.on_list_orders(session, false).await,
            Intent::OrderStatus => self.on_list_orders(session, true).await,
            Intent::SelectOrder => self.on_select_order(session, text, now).await,
            Intent::ListAvailableSlots => self.on_list_slots(session, text, now).await,
            Intent::ExtractDate | Intent::ExtractPeriod => {
                self.on_extract(session, intent, text, now).await
            }
            Intent::RequestSchedule => self.on_request(session, text, now, false).await,
            Intent::Reschedule => self.on_request(session, text, now, true).await,
            Intent::ConfirmSchedule => self.on_confirm(session, now).await,
            Intent::ChangeOrder => self.on_change_order(session, text, now).await,
            Intent::Cancel => {
                let mut session = session;
                session.reset_to_identity();
                Ok((session, Reply::Cancelled))
            }
            Intent::Unrelated => self.on_unrelated(session, text).await,
            Intent::Finished => {
                let mut session = session;
                let Some(name) = session.customer.as_ref().map(|c| c.first_name().to_string())
                else {
                    return Ok((session, Reply::AskCpf));
                };
                session.reset_to_identity();
                Ok((session, Reply::Goodbye { name }))
            }
        }
    }

    async fn on_start(&self, mut session: Session) -> Step {
        let Some(name) = session.customer.as_ref().map(|c| c.first_name().to_string()) else {
            return Ok((session, Reply::Welcome));
        };
        self.load_orders(&mut session).await?;
        let listing = order_listing(&session.orders);
        Ok((session, Reply::Multi(vec![Reply::Greeting { name }, listing])))
    }

    async fn on_identity(&self, mut session: Session, text: &str, now: NaiveDateTime) -> Step {
        let Some(cpf) = local::extract_cpf(text) else {
            return Ok((session, Reply::InvalidCpf));
        };
        let Some(customer) = self.scheduling.erp().find_customer_by_cpf(&cpf).await? else {
            tracing::info!("no customer for CPF");
            return Ok((session, Reply::CustomerNotFound));
        };

        let identity = CustomerIdentity {
            cpf,
            client_id: customer.id,
            name: customer.name,
        };
        let greeting = Reply::Greeting {
            name: identity.first_name().to_string(),
        };
        tracing::info!(client_id = identity.client_id, "customer identified");
        session.customer = Some(identity);
        session.clear_order();
        self.load_orders(&mut session).await?;

        if let [only] = session.orders.as_slice() {
            let only = only.clone();
            let (session, proposal) = self.propose(session, only, now).await?;
            return Ok((session, Reply::Multi(vec![greeting, proposal])));
        }
        let listing = order_listing(&session.orders);
        Ok((session, Reply::Multi(vec![greeting, listing])))
    }

    async fn on_list_orders(&self, mut session: Session, with_status: bool) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        self.load_orders(&mut session).await?;
        let reply = match (session.orders.is_empty(), with_status) {
            (true, _) => Reply::NoOrders,
            (false, true) => Reply::OrderStatus {
                orders: session.orders.clone(),
            },
            (false, false) => Reply::OrderList {
                orders: session.orders.clone(),
            },
        };
        Ok((session, reply))
    }

    async fn on_select_order(&self, mut session: Session, text: &str, now: NaiveDateTime) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        if session.orders.is_empty() {
            self.load_orders(&mut session).await?;
        }
        if session.orders.is_empty() {
            return Ok((session, Reply::NoOrders));
        }

        let chosen = self
            .nlu
            .interpret_order_reference(text, &session.orders)
            .await?
            .and_then(|id| session.orders.iter().find(|o| o.id == id).cloned());
        match chosen {
            Some(order) => self.propose(session, order, now).await,
            None => {
                let orders = session.orders.clone();
                Ok((session, Reply::WhichOrder { orders }))
            }
        }
    }

    async fn on_list_slots(&self, mut session: Session, text: &str, now: NaiveDateTime) -> Step {
        if session.offered_slots.is_empty() {
            let reply = if let Some(order_id) = session.chosen_order.as_ref().map(|o| o.id) {
                Reply::NoAvailability { order_id }
            } else if session.customer.is_none() {
                Reply::AskCpf
            } else {
                self.order_prompt(&mut session).await?
            };
            return Ok((session, reply));
        }

        let period = local::parse_period(text);
        let date = local::parse_date(text, now.date());
        let matching: Vec<_> = session
            .offered_slots
            .iter()
            .filter(|c| period.map_or(true, |p| c.period == p))
            .filter(|c| date.map_or(true, |d| c.date == d))
            .cloned()
            .collect();
        let slots = distinct_slots(&matching, self.max_listed_slots);
        Ok((session, Reply::SlotList { slots }))
    }

    async fn on_extract(
        &self,
        session: Session,
        intent: Intent,
        text: &str,
        now: NaiveDateTime,
    ) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        let reference = now.date();
        let (date, period) = if intent == Intent::ExtractDate {
            (
                self.nlu.interpret_date(text, reference).await?,
                local::parse_period(text),
            )
        } else {
            (
                local::parse_date(text, reference),
                self.nlu.interpret_period(text).await?,
            )
        };

        if date.is_none() && period.is_none() {
            let reply = if intent == Intent::ExtractDate {
                Reply::DateNotUnderstood
            } else {
                Reply::PeriodNotUnderstood
            };
            return Ok((session, reply));
        }
        self.negotiate(session, date, period, now).await
    }

    async fn on_request(
        &self,
        mut session: Session,
        text: &str,
        now: NaiveDateTime,
        reschedule: bool,
    ) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        let Some(order) = session.chosen_order.clone() else {
            if session.orders.is_empty() {
                self.load_orders(&mut session).await?;
            }
            let picked = local::parse_order_reference(text, &session.orders)
                .and_then(|id| session.orders.iter().find(|o| o.id == id).cloned());
            if let Some(order) = picked {
                return self.propose(session, order, now).await;
            }
            let reply = self.order_prompt(&mut session).await?;
            return Ok((session, reply));
        };

        if reschedule {
            session.pending_date = None;
            session.pending_period = None;
            session.awaiting_confirmation = false;
        } else if session.awaiting_confirmation {
            let date = self.nlu.interpret_date(text, now.date()).await?;
            let period = self.nlu.interpret_period(text).await?;
            if date.is_some() || period.is_some() {
                return self.negotiate(session, date, period, now).await;
            }
        }

        let date = match session.pending_date {
            Some(_) => None,
            None => self.nlu.interpret_date(text, now.date()).await?,
        };
        let period = match session.pending_period {
            Some(_) => None,
            None => self.nlu.interpret_period(text).await?,
        };

        let nothing_known = date.is_none()
            && period.is_none()
            && session.pending_date.is_none()
            && session.pending_period.is_none();
        if nothing_known {
            if session.offered_slots.is_empty() {
                return self.propose(session, order, now).await;
            }
            let options = distinct_slots(&session.offered_slots, self.max_listed_slots);
            return Ok((
                session,
                Reply::AskDate {
                    period: None,
                    options,
                },
            ));
        }
        self.negotiate(session, date, period, now).await
    }

    async fn on_confirm(&self, mut session: Session, now: NaiveDateTime) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        let Some(order) = session.chosen_order.clone() else {
            let reply = self.order_prompt(&mut session).await?;
            return Ok((session, reply));
        };
        let (date, period) = match (session.pending_date, session.pending_period) {
            (Some(date), Some(period)) => (date, period),
            _ => return self.negotiate(session, None, None, now).await,
        };
        if !session.awaiting_confirmation {
            // never commit a slot the customer has not seen echoed back
            return self.validate_pinned(session, order, date, period, now).await;
        }

        let offered = session
            .offered_slots
            .iter()
            .find(|c| c.same_slot(date, period))
            .map(|c| c.technician_id);
        let outcome = BookingCommitter::new(&self.scheduling)
            .commit(&order, date, period, offered, now)
            .await;

        match outcome {
            Ok(CommitOutcome::Committed { commit, message }) => {
                session.reset_to_identity();
                Ok((
                    session,
                    Reply::Booked {
                        order_id: commit.order_id(),
                        date: commit.date(),
                        period: commit.period(),
                        message,
                    },
                ))
            }
            Ok(CommitOutcome::SlotTaken { fresh }) => {
                let (session, proposal) = self.offer(session, order.id, fresh, None);
                Ok((
                    session,
                    Reply::Multi(vec![Reply::SlotTaken { date, period }, proposal]),
                ))
            }
            Ok(CommitOutcome::Rejected { message }) => {
                Ok((session, Reply::CommitRejected { message }))
            }
            Err(BookingError::Invalid(e)) => Err(FlowError::Internal(e.to_string())),
            Err(BookingError::External(e)) => Err(FlowError::External(e)),
        }
    }

    async fn on_change_order(&self, mut session: Session, text: &str, now: NaiveDateTime) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        let previous = session.chosen_order.as_ref().map(|o| o.id);
        session.clear_order();
        if session.orders.is_empty() {
            self.load_orders(&mut session).await?;
        }
        let picked = local::parse_order_reference(text, &session.orders)
            .filter(|id| Some(*id) != previous)
            .and_then(|id| session.orders.iter().find(|o| o.id == id).cloned());
        if let Some(order) = picked {
            return self.propose(session, order, now).await;
        }
        let reply = self.order_prompt(&mut session).await?;
        Ok((session, reply))
    }

    async fn on_unrelated(&self, session: Session, text: &str) -> Step {
        if session.customer.is_none() {
            return Ok((session, Reply::AskCpf));
        }
        if let Some(order) = &session.chosen_order {
            let reply = Reply::Nudge {
                order_id: order.id,
                date: session.pending_date,
                period: session.pending_period,
                awaiting: session.awaiting_confirmation,
            };
            return Ok((session, reply));
        }
        let answer = self.nlu.small_talk(text, &session.summary()).await?;
        let reply = if answer.is_empty() {
            Reply::AskDate {
                period: None,
                options: Vec::new(),
            }
        } else {
            Reply::Text(answer)
        };
        Ok((session, reply))
    }

    /// Records newly understood date/period values and moves the negotiation on.
    async fn negotiate(
        &self,
        mut session: Session,
        date: Option<NaiveDate>,
        period: Option<Period>,
        now: NaiveDateTime,
    ) -> Step {
        if date.is_some() || period.is_some() {
            if session.awaiting_confirmation {
                // values under confirmation were proposed, not stated
                session.pending_date = None;
                session.pending_period = None;
            }
            session.pending_date = date.or(session.pending_date);
            session.pending_period = period.or(session.pending_period);
            session.awaiting_confirmation = false;
        }

        let Some(order) = session.chosen_order.clone() else {
            let noted = Reply::Noted {
                date: session.pending_date,
                period: session.pending_period,
            };
            let prompt = self.order_prompt(&mut session).await?;
            return Ok((session, Reply::Multi(vec![noted, prompt])));
        };

        match (session.pending_date, session.pending_period) {
            (Some(date), Some(period)) => {
                self.validate_pinned(session, order, date, period, now)
                    .await
            }
            (Some(date), None) => {
                let mut periods: Vec<Period> = session
                    .offered_slots
                    .iter()
                    .filter(|c| c.date == date)
                    .map(|c| c.period)
                    .collect();
                periods.sort();
                periods.dedup();
                Ok((session, Reply::AskPeriod { date, periods }))
            }
            (None, Some(period)) => {
                let matching: Vec<_> = session
                    .offered_slots
                    .iter()
                    .filter(|c| c.period == period)
                    .cloned()
                    .collect();
                let options = distinct_slots(&matching, self.max_listed_slots);
                Ok((
                    session,
                    Reply::AskDate {
                        period: Some(period),
                        options,
                    },
                ))
            }
            (None, None) => {
                if session.offered_slots.is_empty() {
                    return self.propose(session, order, now).await;
                }
                let options = distinct_slots(&session.offered_slots, self.max_listed_slots);
                Ok((
                    session,
                    Reply::AskDate {
                        period: None,
                        options,
                    },
                ))
            }
        }
    }

    /// Checks one exact (date, period) and echoes it back for confirmation.
    async fn validate_pinned(
        &self,
        mut session: Session,
        order: ServiceOrder,
        date: NaiveDate,
        period: Period,
        now: NaiveDateTime,
    ) -> Step {
        let check = self
            .scheduling
            .suggest_for(&order, now, SlotConstraints::exact(date, period))
            .await?;

        if let Some(primary) = check.primary {
            session.offered_slots.retain(|c| !c.same_slot(date, period));
            session.offered_slots.insert(0, primary);
            session.awaiting_confirmation = true;
            return Ok((
                session,
                Reply::ConfirmPrompt {
                    order_id: order.id,
                    date,
                    period,
                },
            ));
        }

        let (fresh, _) = self
            .scheduling
            .suggest_or_widen(&order, now, SlotConstraints::on_date(date))
            .await?;
        session.pending_date = None;
        session.pending_period = None;
        session.awaiting_confirmation = false;
        session.offered_slots = fresh.candidates();
        Ok((
            session,
            Reply::SlotUnavailable {
                date,
                period,
                alternatives: fresh.distinct_slots(self.max_listed_slots),
            },
        ))
    }

    /// Chooses `order` and proposes its best slot, honoring any date/period
    /// the customer already stated.
    async fn propose(&self, mut session: Session, order: ServiceOrder, now: NaiveDateTime) -> Step {
        let constraints = SlotConstraints {
            date: session.pending_date,
            period: session.pending_period,
        };
        let (suggestion, widened) = self
            .scheduling
            .suggest_or_widen(&order, now, constraints)
            .await?;
        tracing::info!(order_id = order.id, widened, "order selected");

        let order_id = order.id;
        session.chosen_order = Some(order);
        session.clear_negotiation();
        Ok(self.offer(session, order_id, suggestion, widened.then_some(constraints)))
    }

    /// Stores a fresh suggestion on the session and turns it into a proposal.
    fn offer(
        &self,
        mut session: Session,
        order_id: OrderId,
        suggestion: Suggestion,
        missed: Option<SlotConstraints>,
    ) -> (Session, Reply) {
        session.offered_slots = suggestion.candidates();
        let Some(primary) = suggestion.primary.as_ref() else {
            session.pending_date = None;
            session.pending_period = None;
            session.awaiting_confirmation = false;
            return (session, Reply::NoAvailability { order_id });
        };

        session.pending_date = Some(primary.date);
        session.pending_period = Some(primary.period);
        session.awaiting_confirmation = true;
        let alternatives = suggestion
            .distinct_slots(self.max_listed_slots)
            .into_iter()
            .skip(1)
            .collect();
        let reply = Reply::Proposal {
            order_id,
            date: primary.date,
            period: primary.period,
            alternatives,
            missed,
        };
        (session, reply)
    }

    async fn load_orders(&self, session: &mut Session) -> Result<(), FlowError> {
        let Some(client_id) = session.customer.as_ref().map(|c| c.client_id) else {
            return Err(FlowError::Internal(
                "orders requested without a customer".to_string(),
            ));
        };
        let orders = self
            .scheduling
            .erp()
            .orders_for_customer(client_id)
            .await?;
        session.orders = orders
            .into_iter()
            .filter(|o| o.status.is_schedulable())
            .collect();
        Ok(())
    }

    async fn order_prompt(&self, session: &mut Session) -> Result<Reply, FlowError> {
        if session.orders.is_empty() {
            self.load_orders(session).await?;
        }
        Ok(match session.orders.as_slice() {
            [] => Reply::NoOrders,
            orders => Reply::WhichOrder {
                orders: orders.to_vec(),
            },
        })
    }
}

fn order_listing(orders: &[ServiceOrder]) -> Reply {
    if orders.is_empty() {
        Reply::NoOrders
    } else {
        Reply::OrderList {
            orders: orders.to_vec(),
        }
    }
}
