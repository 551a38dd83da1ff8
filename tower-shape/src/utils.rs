use std::sync::Arc;

use shape_limit::PassCounter;
use shape_limit::TrafficShaper;
use tower::ServiceBuilder;
use tower::layer::util::Stack;

use crate::ShapingLayer;

/// Service Builder Extension with traffic shaping for tower::ServiceBuilder.
pub trait ServiceBuilderExt<L> {
    /// Add a traffic shaping layer
    fn traffic_shaping(
        self,
        shaper: Arc<dyn TrafficShaper>,
    ) -> ServiceBuilder<Stack<ShapingLayer<dyn TrafficShaper>, L>>;

    /// Add a traffic shaping layer that records admitted requests in `counter`
    fn counted_traffic_shaping(
        self,
        shaper: Arc<dyn TrafficShaper>,
        counter: Arc<PassCounter>,
    ) -> ServiceBuilder<Stack<ShapingLayer<dyn TrafficShaper>, L>>;
}

impl<L> ServiceBuilderExt<L> for ServiceBuilder<L> {
    fn traffic_shaping(
        self,
        shaper: Arc<dyn TrafficShaper>,
    ) -> ServiceBuilder<Stack<ShapingLayer<dyn TrafficShaper>, L>> {
        self.layer(ShapingLayer::new(shaper))
    }

    fn counted_traffic_shaping(
        self,
        shaper: Arc<dyn TrafficShaper>,
        counter: Arc<PassCounter>,
    ) -> ServiceBuilder<Stack<ShapingLayer<dyn TrafficShaper>, L>> {
        self.layer(ShapingLayer::new(shaper).with_pass_counter(counter))
    }
}
