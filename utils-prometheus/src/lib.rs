use axum::{routing::get, Router};
use prometheus::{core::Collector, Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

pub trait MeteredService {
    fn get_sources(&self) -> impl IntoIterator<Item = Box<dyn Collector>>;
}

/// Declares a struct of prometheus collectors together with its
/// constructor and [`MeteredService`] impl.
#[macro_export]
macro_rules! impl_metered_service {
    (
        $(#[$($struct_attributes:tt)*])*
        $vis:vis struct $struct_name:ident {
            $(
                $(#[$($attributes:tt)*])*
                $field_vis:vis $field_name:ident : $field_type:ty = $constructor:expr
            ),*
            $(,)?
        }
    ) => {
        #[derive(Clone)]
        $(#[$($struct_attributes)*])*
        $vis struct $struct_name {
            $(
                $(#[$($attributes)*])*
                $field_vis $field_name: $field_type
            ),*
        }

        impl $crate::MeteredService for $struct_name {
            fn get_sources(&self) -> impl ::core::iter::IntoIterator<
                Item = ::std::boxed::Box<dyn prometheus::core::Collector>
            > {
                [
                    $(
                        ::std::boxed::Box::new(self.$field_name.clone())
                            as ::std::boxed::Box<dyn prometheus::core::Collector>
                    ),*
                ]
            }
        }

        impl $struct_name {
            $vis fn new() -> Self {
                let new_inner = || -> prometheus::Result<Self> {
                    Ok(Self {
                        $(
                            $field_name: $constructor ?
                        ),*
                    })
                };

                new_inner().expect("Metric definitions are valid")
            }
        }
    }
}

#[derive(Default)]
pub struct MetricsBuilder {
    registry: Registry,
}

impl MetricsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(self, service: &impl MeteredService) -> prometheus::Result<Self> {
        for source in service.get_sources() {
            self.registry.register(source)?;
        }

        Ok(self)
    }

    pub fn build(self) -> Metrics {
        Metrics {
            registry: self.registry,
        }
    }
}

pub struct Metrics {
    registry: Registry,
}

impl Metrics {
    /// Serve `/metrics` on `endpoint` from a background task.
    pub async fn run(self, endpoint: &str) -> std::io::Result<()> {
        let registry = self.registry;
        let app = Router::new().route("/metrics", get(move || gather(registry.clone())));
        let listener = TcpListener::bind(endpoint).await?;

        log::info!("Serving metrics on {endpoint}");

        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                log::error!("Metrics server stopped: {err}");
            }
        });

        Ok(())
    }
}

async fn gather(registry: Registry) -> String {
    let mut buffer = vec![];

    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&registry.gather(), &mut buffer) {
        log::error!("Failed to encode metrics: {err}");
    }

    String::from_utf8_lossy(&buffer).into_owned()
}
